use std::fmt;

use crate::protocol::MessageId;

/// Which per-session array an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Tracker,
    Button,
    Valuator,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Tracker => "tracker",
            Channel::Button => "button",
            Channel::Valuator => "valuator",
        })
    }
}

/// Errors raised by the device client.
///
/// Everything except `IndexOutOfRange` on a local accessor is fatal to the
/// session: the client is marked dead and never talks to the server again.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected message: expected {expected:?}, got {received:?}")]
    UnexpectedMessage {
        expected: MessageId,
        received: MessageId,
    },

    #[error("unknown message id {0}")]
    UnknownMessage(u16),

    #[error("unsupported protocol version {server} (client supports 1..={client_max})")]
    UnsupportedVersion { server: u32, client_max: u32 },

    #[error("invalid device layout: {0}")]
    InvalidLayout(String),

    #[error("{channel} index {index} out of range (0..{len})")]
    IndexOutOfRange {
        channel: Channel,
        index: i64,
        len: usize,
    },

    #[error("invalid string on the wire: {0}")]
    InvalidString(String),

    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("connection to device server is dead")]
    ConnectionDead,
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &ProtocolError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ProtocolError::UnexpectedMessage {
            expected: MessageId::PacketReply,
            received: MessageId::ConnectReply,
        };
        assert_eq!(
            err.to_string(),
            "unexpected message: expected PacketReply, got ConnectReply"
        );

        let err = ProtocolError::IndexOutOfRange {
            channel: Channel::Button,
            index: 7,
            len: 4,
        };
        assert_eq!(err.to_string(), "button index 7 out of range (0..4)");
    }

    #[test]
    fn test_last_error_is_nul_terminated() {
        let last = LastError::new();
        assert!(last.as_ptr().is_null());

        last.set(&ProtocolError::ConnectionDead);
        let msg = unsafe { std::ffi::CStr::from_ptr(last.as_ptr()) };
        assert_eq!(msg.to_str().unwrap(), "connection to device server is dead");

        last.clear();
        assert!(last.as_ptr().is_null());
    }
}
