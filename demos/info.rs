//! Print the layout and virtual devices served by a device server.
//!
//! Usage: cargo run --example info -- [host:port]

use vrdevice_client::{ClientConfig, DeviceClient};

fn main() {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:8555".to_string());

    let client = match DeviceClient::connect(addr.as_str(), ClientConfig::from_env()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let layout = client.layout();
    println!("Protocol:   v{}", client.protocol_version());
    println!("Trackers:   {}", layout.num_trackers);
    println!("Buttons:    {}", layout.num_buttons);
    println!("Valuators:  {}", layout.num_valuators);

    for dev in client.virtual_devices() {
        println!();
        println!("Virtual device \"{}\"", dev.name);
        println!("  track type: {:?}", dev.track_type);
        match dev.tracker_index {
            Some(i) => println!("  tracker:    {}", i),
            None => println!("  tracker:    none"),
        }
        for b in &dev.buttons {
            println!("  button   {:<16} -> {}", b.name, b.index);
        }
        for v in &dev.valuators {
            println!("  valuator {:<16} -> {}", v.name, v.index);
        }
    }

    if let Err(e) = client.disconnect() {
        eprintln!("Disconnect failed: {}", e);
    }
}
