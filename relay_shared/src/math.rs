//! Math types.
//!
//! Only what the relay and the headless client need: a plain 3D vector.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Clamps `x` and `z` into `[-limit, limit]`, leaving `y` untouched.
    pub fn clamp_xz(self, limit: f32) -> Self {
        Self::new(
            self.x.clamp(-limit, limit),
            self.y,
            self.z.clamp(-limit, limit),
        )
    }
}
