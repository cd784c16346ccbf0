//! Stream device state from a device server to stdout.
//!
//! Usage: cargo run --example stream -- [host:port]
//! Press Ctrl+C to stop.

use std::time::{Duration, Instant};
use vrdevice_client::{ClientConfig, DeviceClient, ProtocolError};

fn main() {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:8555".to_string());

    let mut client = match DeviceClient::connect(addr.as_str(), ClientConfig::from_env()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    println!("Protocol: v{}", client.protocol_version());
    println!("Layout:   {:?}", client.layout());
    println!();

    let started = client.activate().and_then(|()| {
        client.start_stream(|_| {}, |e: ProtocolError| eprintln!("Stream failed: {}", e))
    });
    if let Err(e) = started {
        eprintln!("Failed to start streaming: {}", e);
        std::process::exit(1);
    }

    println!("Streaming device state (Ctrl+C to stop)...");

    let reader = client.state_reader();
    let start = Instant::now();
    let mut count: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        match reader.wait_for_packet(Duration::from_secs(2)) {
            Ok(state) => {
                count += 1;

                // Print every ~100th packet to avoid flooding the terminal
                if count % 100 == 1 {
                    if let Ok(t) = state.tracker(0) {
                        let p = &t.position_orientation;
                        println!(
                            "ts={:<12}  pos=[{:+.4}, {:+.4}, {:+.4}]  quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]  buttons={:?}",
                            state.time_stamp(0).unwrap_or(0),
                            p.translation[0], p.translation[1], p.translation[2],
                            p.rotation[0], p.rotation[1], p.rotation[2], p.rotation[3],
                            state.buttons(),
                        );
                    } else {
                        println!("buttons={:?}  valuators={:?}", state.buttons(), state.valuators());
                    }
                }

                // Report rate every 3 seconds
                let now = Instant::now();
                if now.duration_since(last_report) >= Duration::from_secs(3) {
                    let elapsed = start.elapsed().as_secs_f64();
                    let hz = count as f64 / elapsed;
                    println!("--- {} packets in {:.1}s ({:.1} Hz) ---", count, elapsed, hz);
                    last_report = now;
                }
            }
            Err(ProtocolError::Timeout(_)) => {
                eprintln!("Timeout waiting for device state");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} packets in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );

    if let Err(e) = client.disconnect() {
        eprintln!("Disconnect failed: {}", e);
    }
}
