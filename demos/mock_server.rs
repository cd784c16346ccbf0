//! Serve synthetic device state to one client, for trying out the other demos.
//!
//! Usage: cargo run --features mock --example mock_server

use vrdevice_client::mock::{MockDeviceServer, MockServerConfig};

fn main() {
    env_logger::init();

    let server = match MockDeviceServer::spawn(MockServerConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start mock server: {}", e);
            std::process::exit(1);
        }
    };

    println!("Mock device server listening on {}", server.addr());
    println!("Run: cargo run --example stream -- {}", server.addr());

    let received = server.join();
    println!("Session ended after {} requests", received.len());
}
