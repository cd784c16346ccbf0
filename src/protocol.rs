use crate::{ProtocolError, Result};
use std::io::{Read, Write};

// -- Protocol versions --
/// Highest protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 3;
/// Lowest protocol version this client accepts.
pub const MIN_PROTOCOL_VERSION: u32 = 1;
/// First version that sends the virtual device list after the layout.
pub const VIRTUAL_DEVICES_VERSION: u32 = 2;
/// First version that sends per-tracker timestamps with every packet.
pub const TIME_STAMPS_VERSION: u32 = 3;

// -- Sanity limits for values read off the wire --
pub const MAX_CHANNELS: i32 = 1 << 16;
pub const MAX_VIRTUAL_DEVICES: i32 = 1 << 12;

/// Message tags exchanged with the device server.
///
/// Sent as a little-endian `u16` at the start of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    ConnectRequest = 0,
    ConnectReply = 1,
    DisconnectRequest = 2,
    ActivateRequest = 3,
    DeactivateRequest = 4,
    PacketRequest = 5,
    PacketReply = 6,
    StartStreamRequest = 7,
    StopStreamRequest = 8,
    StopStreamReply = 9,
}

impl TryFrom<u16> for MessageId {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<MessageId> {
        Ok(match value {
            0 => MessageId::ConnectRequest,
            1 => MessageId::ConnectReply,
            2 => MessageId::DisconnectRequest,
            3 => MessageId::ActivateRequest,
            4 => MessageId::DeactivateRequest,
            5 => MessageId::PacketRequest,
            6 => MessageId::PacketReply,
            7 => MessageId::StartStreamRequest,
            8 => MessageId::StopStreamRequest,
            9 => MessageId::StopStreamReply,
            other => return Err(ProtocolError::UnknownMessage(other)),
        })
    }
}

/// Outcome of the version handshake.
///
/// The capability flags are derived from the version number alone and never
/// change for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub version: u32,
    pub has_virtual_devices: bool,
    pub has_time_stamps: bool,
}

impl ProtocolVersion {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            has_virtual_devices: version >= VIRTUAL_DEVICES_VERSION,
            has_time_stamps: version >= TIME_STAMPS_VERSION,
        }
    }
}

/// Version a server answers to a CONNECT_REQUEST carrying `client_max`.
pub fn server_reply_version(client_max: u32, server_max: u32) -> u32 {
    client_max.min(server_max)
}

/// Validate the server's CONNECT_REPLY version against the client maximum.
pub fn negotiate(client_max: u32, server_version: u32) -> Result<ProtocolVersion> {
    if !(MIN_PROTOCOL_VERSION..=client_max).contains(&server_version) {
        return Err(ProtocolError::UnsupportedVersion {
            server: server_version,
            client_max,
        });
    }
    Ok(ProtocolVersion::new(server_version))
}

/// Convert a wire count into a `usize`, rejecting negative or absurd values.
pub fn checked_count(what: &str, value: i32, max: i32) -> Result<usize> {
    if !(0..=max).contains(&value) {
        return Err(ProtocolError::InvalidLayout(format!(
            "{} count {} outside 0..={}",
            what, value, max
        )));
    }
    Ok(value as usize)
}

/// Little-endian primitive decoding on top of any byte source.
pub trait ReadWire: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_vec3(&mut self) -> Result<[f32; 3]> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    /// `u16` byte length followed by UTF-8 bytes.
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| ProtocolError::InvalidString(e.to_string()))
    }

    fn read_message_id(&mut self) -> Result<MessageId> {
        MessageId::try_from(self.read_u16()?)
    }
}

impl<R: Read + ?Sized> ReadWire for R {}

/// Little-endian primitive encoding on top of any byte sink.
pub trait WriteWire: Write {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])?;
        Ok(())
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_vec3(&mut self, value: &[f32; 3]) -> Result<()> {
        value.iter().try_for_each(|&v| self.write_f32(v))
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            ProtocolError::InvalidString(format!("{} bytes exceeds u16 length", value.len()))
        })?;
        self.write_u16(len)?;
        self.write_all(value.as_bytes())?;
        Ok(())
    }

    /// Index as a signed wire integer.
    fn write_index(&mut self, index: usize) -> Result<()> {
        let value = i32::try_from(index)
            .map_err(|_| ProtocolError::InvalidLayout(format!("index {} too large", index)))?;
        self.write_i32(value)
    }

    fn write_message_id(&mut self, id: MessageId) -> Result<()> {
        self.write_u16(id as u16)
    }
}

impl<W: Write + ?Sized> WriteWire for W {}
