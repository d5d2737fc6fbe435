//! Car kinematics.
//!
//! In the browser client this ran once per animation frame off the keyboard
//! state. Here it turns a sampled `DriveInput` into the next pose, which is
//! what gets sent to the relay as an update.

use relay_shared::{
    entity::{JoinRequest, PoseUpdate, DEFAULT_POSITION},
    math::Vec3,
};

/// Speed gained per step while throttling.
pub const ACCELERATION: f32 = 0.01;
/// Speed cap, forward and reverse.
pub const MAX_SPEED: f32 = 0.4;
/// Speed multiplier per step when coasting.
pub const FRICTION: f32 = 0.98;
/// Speed multiplier per step when braking.
pub const BRAKE_FACTOR: f32 = 0.8;
/// Heading change per step while steering, in radians.
pub const TURN_RATE: f32 = 0.03;
/// Half-width of the drivable square on x/z.
pub const WORLD_LIMIT: f32 = 99.0;

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveInput {
    pub throttle: bool,
    pub reverse: bool,
    pub brake: bool,
    pub left: bool,
    pub right: bool,
}

/// Local car state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Car {
    pub position: Vec3,
    pub heading: f32,
    pub speed: f32,
}

impl Default for Car {
    fn default() -> Self {
        Self {
            position: DEFAULT_POSITION,
            heading: 0.0,
            speed: 0.0,
        }
    }
}

impl Car {
    /// Advances one step.
    pub fn step(&mut self, input: DriveInput) {
        if input.throttle {
            self.speed += ACCELERATION;
        }
        if input.reverse {
            self.speed -= ACCELERATION;
        }
        self.speed *= if input.brake { BRAKE_FACTOR } else { FRICTION };
        self.speed = self.speed.clamp(-MAX_SPEED, MAX_SPEED);

        // Steering flips when reversing and does nothing at a standstill.
        if self.speed != 0.0 {
            let dir = self.speed.signum();
            if input.left {
                self.heading += TURN_RATE * dir;
            }
            if input.right {
                self.heading -= TURN_RATE * dir;
            }
        }

        self.position.x += self.heading.sin() * self.speed;
        self.position.z += self.heading.cos() * self.speed;
        self.position = self.position.clamp_xz(WORLD_LIMIT);
    }

    pub fn pose(&self) -> PoseUpdate {
        PoseUpdate {
            position: self.position,
            heading: self.heading,
        }
    }

    /// Join payload announcing this car under `name`.
    pub fn join_request(&self, name: &str) -> JoinRequest {
        JoinRequest {
            position: Some(self.position),
            heading: Some(self.heading),
            name: Some(name.to_string()),
        }
    }
}
