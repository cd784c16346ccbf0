//! # vrdevice-client - streaming client for VR device servers
//!
//! Connects to a device server over TCP, negotiates the protocol version and
//! receives the live state of its trackers, buttons and valuators. Provides:
//! - Handshake with version negotiation and the virtual device list
//! - Synchronous polling (one request per packet)
//! - Streaming from a background receiver thread, with the newest snapshot
//!   readable from any thread
//! - C FFI for integration with C/C++ consumers
//!
//! ## Quick Start
//! ```no_run
//! use vrdevice_client::{ClientConfig, DeviceClient};
//!
//! let mut client = DeviceClient::connect("localhost:8555", ClientConfig::default()).unwrap();
//! println!("{} trackers", client.layout().num_trackers);
//!
//! client.activate().unwrap();
//! client.start_stream(|_| {}, |e| eprintln!("stream failed: {}", e)).unwrap();
//! for _ in 0..100 {
//!     let state = client.get_packet().unwrap();
//!     println!("pos: {:?}", state.tracker(0).unwrap().position_orientation.translation);
//! }
//! client.disconnect().unwrap();
//! ```

pub mod error;
pub mod config;
pub mod types;
pub mod layout;
pub mod state;
pub mod descriptor;
pub mod protocol;
pub mod pipe;
pub mod stream;
pub mod client;
pub mod ffi;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::ProtocolError;
pub use config::ClientConfig;
pub use types::*;
pub use layout::DeviceLayout;
pub use state::DeviceState;
pub use descriptor::{NamedIndex, TrackType, VirtualDeviceDescriptor};
pub use client::DeviceClient;
pub use stream::{StateGuard, StateReader};

/// Result type alias for device client operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
