use crate::protocol::PROTOCOL_VERSION;
use std::time::Duration;

/// Timeouts and negotiation limits for a DeviceClient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Wait for CONNECT_REPLY, for each polled PACKET_REPLY, and for the
    /// first streamed packet.
    pub timeout: Duration,
    /// TCP connect timeout per resolved address.
    pub connect_timeout: Duration,
    /// How long `stop_stream` waits for STOPSTREAM_REPLY before tearing the
    /// connection down. `None` waits forever.
    pub stop_stream_timeout: Option<Duration>,
    /// Version offered in CONNECT_REQUEST.
    pub max_protocol_version: u32,
    /// Disable Nagle's algorithm on TCP connections.
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            stop_stream_timeout: Some(Duration::from_secs(10)),
            max_protocol_version: PROTOCOL_VERSION,
            nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `VRDEVICE_*` environment variables.
    ///
    /// - `VRDEVICE_TIMEOUT_MS`
    /// - `VRDEVICE_CONNECT_TIMEOUT_MS`
    /// - `VRDEVICE_STOP_TIMEOUT_MS` (`0` waits forever)
    /// - `VRDEVICE_PROTOCOL_VERSION` (clamped to 1..=3)
    /// - `VRDEVICE_NODELAY`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read_u64 = |name: &str| parse_u64(lookup(name));
        Self {
            timeout: read_u64("VRDEVICE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            connect_timeout: read_u64("VRDEVICE_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            stop_stream_timeout: match read_u64("VRDEVICE_STOP_TIMEOUT_MS") {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.stop_stream_timeout,
            },
            max_protocol_version: read_u64("VRDEVICE_PROTOCOL_VERSION")
                .map(|v| v.clamp(1, PROTOCOL_VERSION as u64) as u32)
                .unwrap_or(defaults.max_protocol_version),
            nodelay: parse_bool(lookup("VRDEVICE_NODELAY")).unwrap_or(defaults.nodelay),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_stop_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stop_stream_timeout = timeout;
        self
    }

    pub fn with_max_protocol_version(mut self, version: u32) -> Self {
        self.max_protocol_version = version;
        self
    }
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    let v = value?.trim().to_ascii_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u64(value: Option<String>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}
