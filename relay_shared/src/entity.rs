//! Player entity and connection identity.
//!
//! An `Entity` is the relay's transient record of one joined player: where
//! the car is, which way it faces and the name shown above it. Entities are
//! keyed by the `ConnId` of the connection that created them.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Spawn position used when a join does not carry one.
pub const DEFAULT_POSITION: Vec3 = Vec3::new(0.0, 0.4, 0.0);
/// Heading (radians) used when a join does not carry one.
pub const DEFAULT_HEADING: f32 = 0.0;
/// Display name used when a join carries no usable name.
pub const DEFAULT_NAME: &str = "Anonymous";

static NEXT_CONN_SEQ: AtomicU64 = AtomicU64::new(1);

/// Opaque, non-empty identity of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnId(String);

impl ConnId {
    /// Allocates an id that no other connection of this process has used.
    ///
    /// The sequence number guarantees uniqueness; the random tail keeps ids
    /// from being guessable.
    pub fn new_unique() -> Self {
        let seq = NEXT_CONN_SEQ.fetch_add(1, Ordering::Relaxed);
        let tail: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        ConnId(format!("{seq:x}-{tail}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConnId {
    type Error = ConnIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(ConnIdError::Empty);
        }
        Ok(ConnId(value))
    }
}

impl TryFrom<&str> for ConnId {
    type Error = ConnIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ConnId::try_from(value.to_string())
    }
}

impl From<ConnId> for String {
    fn from(id: ConnId) -> Self {
        id.0
    }
}

/// Error type for connection id parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnIdError {
    Empty,
}

impl fmt::Display for ConnIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnIdError::Empty => write!(f, "connection id must not be empty"),
        }
    }
}

impl std::error::Error for ConnIdError {}

/// Server-side record of one joined player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: ConnId,
    pub position: Vec3,
    /// Yaw in radians.
    pub heading: f32,
    /// Fixed at join time.
    pub name: String,
}

impl Entity {
    /// Overwrites the pose, keeping id and name.
    pub fn apply_pose(&mut self, pose: PoseUpdate) {
        self.position = pose.position;
        self.heading = pose.heading;
    }
}

/// Join payload. Every field is optional; see the `DEFAULT_*` constants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    pub position: Option<Vec3>,
    pub heading: Option<f32>,
    pub name: Option<String>,
}

impl JoinRequest {
    /// True unless a supplied position or heading is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.position.map_or(true, |p| p.is_finite())
            && self.heading.map_or(true, f32::is_finite)
    }

    /// Builds the entity for `id`, filling in defaults for absent fields.
    ///
    /// A blank name counts as absent.
    pub fn into_entity(self, id: ConnId) -> Entity {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        Entity {
            id,
            position: self.position.unwrap_or(DEFAULT_POSITION),
            heading: self.heading.unwrap_or(DEFAULT_HEADING),
            name,
        }
    }
}

/// Pose carried by an update event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseUpdate {
    pub position: Vec3,
    pub heading: f32,
}

impl PoseUpdate {
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.heading.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_join_gets_defaults() {
        let id = ConnId::try_from("b").unwrap();
        let e = JoinRequest::default().into_entity(id.clone());
        assert_eq!(e.id, id);
        assert_eq!(e.position, Vec3::new(0.0, 0.4, 0.0));
        assert_eq!(e.heading, 0.0);
        assert_eq!(e.name, "Anonymous");
    }

    #[test]
    fn explicit_zero_is_not_replaced() {
        let e = JoinRequest {
            position: Some(Vec3::ZERO),
            heading: Some(0.0),
            name: Some("Bo".into()),
        }
        .into_entity(ConnId::try_from("a").unwrap());
        assert_eq!(e.position, Vec3::ZERO);
        assert_eq!(e.name, "Bo");
    }

    #[test]
    fn blank_name_falls_back() {
        let e = JoinRequest {
            name: Some("   ".into()),
            ..Default::default()
        }
        .into_entity(ConnId::try_from("a").unwrap());
        assert_eq!(e.name, DEFAULT_NAME);
    }

    #[test]
    fn apply_pose_keeps_identity() {
        let mut e = JoinRequest {
            name: Some("Bo".into()),
            ..Default::default()
        }
        .into_entity(ConnId::try_from("a").unwrap());
        e.apply_pose(PoseUpdate {
            position: Vec3::new(5.0, 0.4, 2.0),
            heading: 1.57,
        });
        assert_eq!(e.name, "Bo");
        assert_eq!(e.id.as_str(), "a");
        assert_eq!(e.position, Vec3::new(5.0, 0.4, 2.0));
        assert_eq!(e.heading, 1.57);
    }

    #[test]
    fn non_finite_poses_are_flagged() {
        assert!(JoinRequest::default().is_finite());
        let bad_join = JoinRequest {
            heading: Some(f32::NAN),
            ..Default::default()
        };
        assert!(!bad_join.is_finite());

        let bad_update = PoseUpdate {
            position: Vec3::new(f32::INFINITY, 0.4, 0.0),
            heading: 0.0,
        };
        assert!(!bad_update.is_finite());
    }

    #[test]
    fn conn_ids_are_unique_and_non_empty() {
        let a = ConnId::new_unique();
        let b = ConnId::new_unique();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn empty_conn_id_is_rejected() {
        assert_eq!(ConnId::try_from(""), Err(ConnIdError::Empty));
        assert!(serde_json::from_str::<ConnId>("\"\"").is_err());
    }
}
