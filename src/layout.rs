use crate::protocol::{checked_count, ReadWire, MAX_CHANNELS};
use crate::Result;
use std::io::Read;

/// Number of trackers, buttons and valuators served for a session.
///
/// Read once during the handshake and never changed afterwards.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceLayout {
    pub num_trackers: usize,
    pub num_buttons: usize,
    pub num_valuators: usize,
}

impl DeviceLayout {
    pub fn new(num_trackers: usize, num_buttons: usize, num_valuators: usize) -> Self {
        Self {
            num_trackers,
            num_buttons,
            num_valuators,
        }
    }

    /// Wire layout: three `i32` (trackers, buttons, valuators).
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<DeviceLayout> {
        let num_trackers = checked_count("tracker", r.read_i32()?, MAX_CHANNELS)?;
        let num_buttons = checked_count("button", r.read_i32()?, MAX_CHANNELS)?;
        let num_valuators = checked_count("valuator", r.read_i32()?, MAX_CHANNELS)?;
        Ok(DeviceLayout::new(num_trackers, num_buttons, num_valuators))
    }

    #[cfg(any(test, feature = "mock"))]
    pub(crate) fn write_to<W: std::io::Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        use crate::protocol::WriteWire;
        w.write_index(self.num_trackers)?;
        w.write_index(self.num_buttons)?;
        w.write_index(self.num_valuators)
    }

    /// Size in bytes of one encoded DeviceState packet body.
    pub fn packet_size(&self, with_time_stamps: bool) -> usize {
        let trackers = self.num_trackers * 13 * 4;
        let stamps = if with_time_stamps { self.num_trackers * 4 } else { 0 };
        trackers + stamps + self.num_buttons.div_ceil(8) + self.num_valuators * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WriteWire;
    use crate::ProtocolError;
    use std::io::Cursor;

    #[test]
    fn test_read_layout_order() {
        let mut buf = Vec::new();
        buf.write_i32(2).unwrap();
        buf.write_i32(9).unwrap();
        buf.write_i32(4).unwrap();
        let layout = DeviceLayout::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(layout, DeviceLayout::new(2, 9, 4));
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut buf = Vec::new();
        buf.write_i32(1).unwrap();
        buf.write_i32(-3).unwrap();
        buf.write_i32(0).unwrap();
        assert!(matches!(
            DeviceLayout::read_from(&mut Cursor::new(buf)),
            Err(ProtocolError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_packet_size() {
        let layout = DeviceLayout::new(2, 9, 3);
        assert_eq!(layout.packet_size(false), 104 + 2 + 12);
        assert_eq!(layout.packet_size(true), 104 + 8 + 2 + 12);
        assert_eq!(DeviceLayout::default().packet_size(true), 0);
    }
}
