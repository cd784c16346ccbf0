use crate::error::Channel;
use crate::layout::DeviceLayout;
use crate::protocol::{ReadWire, WriteWire};
use crate::types::{TimeStamp, TrackerState};
use crate::{ProtocolError, Result};
use std::io::{Read, Write};

/// Snapshot of every tracker, button and valuator served by a device server.
///
/// The array lengths always match the layout the state was created with.
/// Packets replace the whole snapshot; there are no partial updates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceState {
    trackers: Vec<TrackerState>,
    time_stamps: Vec<TimeStamp>,
    buttons: Vec<bool>,
    valuators: Vec<f32>,
}

fn check(channel: Channel, index: usize, len: usize) -> Result<usize> {
    if index < len {
        Ok(index)
    } else {
        Err(ProtocolError::IndexOutOfRange {
            channel,
            index: index as i64,
            len,
        })
    }
}

impl DeviceState {
    /// Zero-initialized state for `layout`.
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            trackers: vec![TrackerState::default(); layout.num_trackers],
            time_stamps: vec![0; layout.num_trackers],
            buttons: vec![false; layout.num_buttons],
            valuators: vec![0.0; layout.num_valuators],
        }
    }

    pub fn layout(&self) -> DeviceLayout {
        DeviceLayout::new(self.trackers.len(), self.buttons.len(), self.valuators.len())
    }

    /// Reallocate for a new layout, discarding all values.
    pub fn set_layout(&mut self, layout: DeviceLayout) {
        *self = DeviceState::new(layout);
    }

    pub fn trackers(&self) -> &[TrackerState] {
        &self.trackers
    }

    pub fn tracker(&self, index: usize) -> Result<&TrackerState> {
        let i = check(Channel::Tracker, index, self.trackers.len())?;
        Ok(&self.trackers[i])
    }

    pub fn set_tracker(&mut self, index: usize, state: TrackerState) -> Result<()> {
        let i = check(Channel::Tracker, index, self.trackers.len())?;
        self.trackers[i] = state;
        Ok(())
    }

    pub fn time_stamps(&self) -> &[TimeStamp] {
        &self.time_stamps
    }

    pub fn time_stamp(&self, index: usize) -> Result<TimeStamp> {
        let i = check(Channel::Tracker, index, self.time_stamps.len())?;
        Ok(self.time_stamps[i])
    }

    pub fn set_time_stamp(&mut self, index: usize, stamp: TimeStamp) -> Result<()> {
        let i = check(Channel::Tracker, index, self.time_stamps.len())?;
        self.time_stamps[i] = stamp;
        Ok(())
    }

    /// Stamp every tracker with the same time.
    pub fn set_all_time_stamps(&mut self, stamp: TimeStamp) {
        self.time_stamps.fill(stamp);
    }

    pub fn buttons(&self) -> &[bool] {
        &self.buttons
    }

    pub fn button(&self, index: usize) -> Result<bool> {
        let i = check(Channel::Button, index, self.buttons.len())?;
        Ok(self.buttons[i])
    }

    pub fn set_button(&mut self, index: usize, pressed: bool) -> Result<()> {
        let i = check(Channel::Button, index, self.buttons.len())?;
        self.buttons[i] = pressed;
        Ok(())
    }

    pub fn valuators(&self) -> &[f32] {
        &self.valuators
    }

    pub fn valuator(&self, index: usize) -> Result<f32> {
        let i = check(Channel::Valuator, index, self.valuators.len())?;
        Ok(self.valuators[i])
    }

    pub fn set_valuator(&mut self, index: usize, value: f32) -> Result<()> {
        let i = check(Channel::Valuator, index, self.valuators.len())?;
        self.valuators[i] = value;
        Ok(())
    }

    /// Encode a PACKET_REPLY body.
    ///
    /// Layout:
    /// - tracker states (13 x f32 each)
    /// - tracker timestamps (u32 each), only if `with_time_stamps`
    /// - buttons, LSB-first bit-packed, `ceil(n / 8)` bytes
    /// - valuators (f32 each)
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W, with_time_stamps: bool) -> Result<()> {
        for tracker in &self.trackers {
            tracker.write_to(w)?;
        }
        if with_time_stamps {
            for &stamp in &self.time_stamps {
                w.write_u32(stamp)?;
            }
        }
        for chunk in self.buttons.chunks(8) {
            let bits = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (bit, &pressed)| acc | ((pressed as u8) << bit));
            w.write_u8(bits)?;
        }
        for &value in &self.valuators {
            w.write_f32(value)?;
        }
        Ok(())
    }

    /// Decode a PACKET_REPLY body into this state, keeping its layout.
    ///
    /// Timestamps are left untouched when the stream carries none.
    pub fn read_from<R: Read + ?Sized>(&mut self, r: &mut R, with_time_stamps: bool) -> Result<()> {
        for tracker in self.trackers.iter_mut() {
            *tracker = TrackerState::read_from(r)?;
        }
        if with_time_stamps {
            for stamp in self.time_stamps.iter_mut() {
                *stamp = r.read_u32()?;
            }
        }
        for chunk in self.buttons.chunks_mut(8) {
            let bits = r.read_u8()?;
            for (bit, pressed) in chunk.iter_mut().enumerate() {
                *pressed = bits & (1 << bit) != 0;
            }
        }
        for value in self.valuators.iter_mut() {
            *value = r.read_f32()?;
        }
        Ok(())
    }
}
