use crate::error::Channel;
use crate::layout::DeviceLayout;
use crate::protocol::{checked_count, ReadWire, WriteWire, MAX_CHANNELS};
use crate::types::PositionOrientation;
use crate::{ProtocolError, Result};
use std::io::{Read, Write};

bitflags::bitflags! {
    /// Tracking capabilities of a virtual device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct TrackType: u32 {
        const POSITION    = 1 << 0;
        const DIRECTION   = 1 << 1;
        const ORIENTATION = 1 << 2;
        /// Full 6-DOF tracking.
        const FULL = Self::POSITION.bits() | Self::DIRECTION.bits() | Self::ORIENTATION.bits();
    }
}

/// A named button or valuator of a virtual device and its slot in the DeviceState.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedIndex {
    pub name: String,
    pub index: usize,
}

/// Static description of one logical input device exposed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDeviceDescriptor {
    pub name: String,
    pub track_type: TrackType,
    /// Pointing direction in tracker space; only meaningful with `DIRECTION`.
    pub ray_direction: [f32; 3],
    /// Offset of the ray origin along `ray_direction`.
    pub ray_start: f32,
    /// Tracker slot, or `None` for untracked devices.
    pub tracker_index: Option<usize>,
    pub buttons: Vec<NamedIndex>,
    pub valuators: Vec<NamedIndex>,
}

impl Default for VirtualDeviceDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            track_type: TrackType::empty(),
            ray_direction: [0.0, 1.0, 0.0],
            ray_start: 0.0,
            tracker_index: None,
            buttons: Vec::new(),
            valuators: Vec::new(),
        }
    }
}

fn read_index<R: Read + ?Sized>(r: &mut R, channel: Channel, len: usize) -> Result<usize> {
    let raw = r.read_i32()?;
    if raw < 0 || raw as usize >= len {
        return Err(ProtocolError::IndexOutOfRange {
            channel,
            index: raw as i64,
            len,
        });
    }
    Ok(raw as usize)
}

fn read_named<R: Read + ?Sized>(r: &mut R, channel: Channel, len: usize) -> Result<Vec<NamedIndex>> {
    let count = checked_count(&channel.to_string(), r.read_i32()?, MAX_CHANNELS)?;
    let names = (0..count)
        .map(|_| r.read_string())
        .collect::<Result<Vec<_>>>()?;
    names
        .into_iter()
        .map(|name| Ok(NamedIndex { name, index: read_index(r, channel, len)? }))
        .collect()
}

fn write_named<W: Write + ?Sized>(w: &mut W, entries: &[NamedIndex]) -> Result<()> {
    w.write_index(entries.len())?;
    for entry in entries {
        w.write_string(&entry.name)?;
    }
    for entry in entries {
        w.write_index(entry.index)?;
    }
    Ok(())
}

impl VirtualDeviceDescriptor {
    pub fn is_tracked(&self) -> bool {
        self.tracker_index.is_some() && !self.track_type.is_empty()
    }

    pub fn button_index(&self, name: &str) -> Option<usize> {
        self.buttons.iter().find(|b| b.name == name).map(|b| b.index)
    }

    pub fn valuator_index(&self, name: &str) -> Option<usize> {
        self.valuators.iter().find(|v| v.name == name).map(|v| v.index)
    }

    /// World-space pointing ray `(origin, direction)` for the given tracker pose.
    ///
    /// Returns `None` unless the device tracks a direction.
    pub fn ray(&self, pose: &PositionOrientation) -> Option<([f32; 3], [f32; 3])> {
        if !self.track_type.contains(TrackType::DIRECTION) {
            return None;
        }
        let start = self.ray_direction.map(|c| c * self.ray_start);
        Some((pose.transform_point(start), pose.rotate_vector(self.ray_direction)))
    }

    /// Decode one descriptor record, validating every index against `layout`.
    ///
    /// Record layout: name, track type (u32), ray direction (3 x f32),
    /// ray start (f32), tracker index (i32, -1 = none), then the button and
    /// valuator tables as `count, names..., indices...`.
    pub fn read_from<R: Read + ?Sized>(r: &mut R, layout: &DeviceLayout) -> Result<Self> {
        let name = r.read_string()?;
        let track_type = TrackType::from_bits_truncate(r.read_u32()?);
        let ray_direction = r.read_vec3()?;
        let ray_start = r.read_f32()?;
        let tracker_index = match r.read_i32()? {
            -1 => None,
            raw if raw >= 0 && (raw as usize) < layout.num_trackers => Some(raw as usize),
            raw => {
                return Err(ProtocolError::IndexOutOfRange {
                    channel: Channel::Tracker,
                    index: raw as i64,
                    len: layout.num_trackers,
                })
            }
        };
        let buttons = read_named(r, Channel::Button, layout.num_buttons)?;
        let valuators = read_named(r, Channel::Valuator, layout.num_valuators)?;

        Ok(VirtualDeviceDescriptor {
            name,
            track_type,
            ray_direction,
            ray_start,
            tracker_index,
            buttons,
            valuators,
        })
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_string(&self.name)?;
        w.write_u32(self.track_type.bits())?;
        w.write_vec3(&self.ray_direction)?;
        w.write_f32(self.ray_start)?;
        match self.tracker_index {
            Some(index) => w.write_index(index)?,
            None => w.write_i32(-1)?,
        }
        write_named(w, &self.buttons)?;
        write_named(w, &self.valuators)
    }
}

/// Read the `count, records...` virtual device list sent by version 2+ servers.
pub fn read_descriptor_list<R: Read + ?Sized>(
    r: &mut R,
    layout: &DeviceLayout,
) -> Result<Vec<VirtualDeviceDescriptor>> {
    let count = checked_count(
        "virtual device",
        r.read_i32()?,
        crate::protocol::MAX_VIRTUAL_DEVICES,
    )?;
    (0..count)
        .map(|_| VirtualDeviceDescriptor::read_from(r, layout))
        .collect()
}

#[cfg(any(test, feature = "mock"))]
pub(crate) fn write_descriptor_list<W: Write + ?Sized>(
    w: &mut W,
    descriptors: &[VirtualDeviceDescriptor],
) -> Result<()> {
    w.write_index(descriptors.len())?;
    descriptors.iter().try_for_each(|d| d.write_to(w))
}
