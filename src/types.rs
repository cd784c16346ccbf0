use crate::protocol::{ReadWire, WriteWire};
use crate::Result;
use std::io::{Read, Write};

/// Tracker timestamp in microseconds. Wraps around.
pub type TimeStamp = u32;

/// Rigid body transform of a tracker.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOrientation {
    /// Translation [x, y, z] in server units.
    pub translation: [f32; 3],
    /// Unit quaternion [qx, qy, qz, qw].
    pub rotation: [f32; 4],
}

impl Default for PositionOrientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl PositionOrientation {
    pub const IDENTITY: PositionOrientation = PositionOrientation {
        translation: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
    };

    /// Rotate a vector by the orientation part only.
    pub fn rotate_vector(&self, v: [f32; 3]) -> [f32; 3] {
        // v' = v + 2w(q x v) + 2 q x (q x v)
        let [x, y, z, w] = self.rotation;
        let q = [x, y, z];
        let t = cross(q, v).map(|c| 2.0 * c);
        let u = cross(q, t);
        [
            v[0] + w * t[0] + u[0],
            v[1] + w * t[1] + u[1],
            v[2] + w * t[2] + u[2],
        ]
    }

    /// Apply the full transform to a point.
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let r = self.rotate_vector(p);
        [
            r[0] + self.translation[0],
            r[1] + self.translation[1],
            r[2] + self.translation[2],
        ]
    }

    /// 3x3 row-major rotation matrix.
    pub fn rotation_matrix(&self) -> [[f32; 3]; 3] {
        let [x, y, z, w] = self.rotation;
        [
            [1.0 - 2.0*(y*y + z*z), 2.0*(x*y - z*w),       2.0*(x*z + y*w)],
            [2.0*(x*y + z*w),       1.0 - 2.0*(x*x + z*z), 2.0*(y*z - x*w)],
            [2.0*(x*z - y*w),       2.0*(y*z + x*w),       1.0 - 2.0*(x*x + y*y)],
        ]
    }

    /// Euler angles [roll, pitch, yaw] in degrees (ZYX convention).
    pub fn euler_deg(&self) -> [f32; 3] {
        let [x, y, z, w] = self.rotation;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
    }
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// State of a single 6-DOF tracker slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackerState {
    pub position_orientation: PositionOrientation,
    /// Linear velocity in server units per second.
    pub linear_velocity: [f32; 3],
    /// Angular velocity in radians per second.
    pub angular_velocity: [f32; 3],
}

impl TrackerState {
    /// Wire layout: translation, quaternion, linear velocity, angular velocity (13 x f32).
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<TrackerState> {
        let translation = r.read_vec3()?;
        let rotation = [r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?];
        let linear_velocity = r.read_vec3()?;
        let angular_velocity = r.read_vec3()?;
        Ok(TrackerState {
            position_orientation: PositionOrientation {
                translation,
                rotation,
            },
            linear_velocity,
            angular_velocity,
        })
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_vec3(&self.position_orientation.translation)?;
        for &q in &self.position_orientation.rotation {
            w.write_f32(q)?;
        }
        w.write_vec3(&self.linear_velocity)?;
        w.write_vec3(&self.angular_velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_identity() {
        let po = PositionOrientation::default();
        assert_eq!(po.transform_point([1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
        let m = po.rotation_matrix();
        assert_eq!(m[0][0], 1.0);
        assert_eq!(m[1][1], 1.0);
        assert_eq!(m[2][2], 1.0);
        assert!(po.euler_deg().iter().all(|a| a.abs() < 1e-6));
    }

    #[test]
    fn test_rotation_about_z() {
        // 90 degrees about +Z
        let h = std::f32::consts::FRAC_1_SQRT_2;
        let po = PositionOrientation {
            translation: [10.0, 0.0, 0.0],
            rotation: [0.0, 0.0, h, h],
        };
        assert!(approx(po.rotate_vector([1.0, 0.0, 0.0]), [0.0, 1.0, 0.0]));
        assert!(approx(po.transform_point([1.0, 0.0, 0.0]), [10.0, 1.0, 0.0]));
        assert!((po.euler_deg()[2] - 90.0).abs() < 1e-3);

        let m = po.rotation_matrix();
        assert!((m[1][0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tracker_wire_size() {
        let mut buf = Vec::new();
        TrackerState::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 13 * 4);
    }
}
