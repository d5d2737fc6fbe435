//! Connection registry.
//!
//! The single authoritative store of joined entities, keyed by connection
//! id. All access goes through one `RwLock`; every critical section is a
//! plain map operation, so nothing here blocks on I/O.
//!
//! A poisoned lock is recovered rather than propagated: no critical section
//! can leave the map half-updated, so the data behind it is still valid.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use relay_shared::entity::{ConnId, Entity, PoseUpdate};

/// Registry operation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No entity for this id: the join never completed or the connection
    /// already left.
    NotFound(ConnId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "no entity for connection {id}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Thread-safe map of `ConnId` to `Entity`.
#[derive(Debug, Default)]
pub struct Registry {
    entities: RwLock<HashMap<ConnId, Entity>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnId, Entity>> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnId, Entity>> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or fully replaces the entity stored under `entity.id`.
    /// Returns the replaced entity on a re-join.
    pub fn put(&self, entity: Entity) -> Option<Entity> {
        self.write().insert(entity.id.clone(), entity)
    }

    /// Updates position and heading of an existing entity and returns the
    /// merged result.
    pub fn patch(&self, id: &ConnId, pose: PoseUpdate) -> Result<Entity, RegistryError> {
        let mut entities = self.write();
        let entity = entities
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        entity.apply_pose(pose);
        Ok(entity.clone())
    }

    /// Deletes the entity if present. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ConnId) -> Option<Entity> {
        self.write().remove(id)
    }

    /// Owned copy of the whole registry at one point in time.
    pub fn snapshot(&self) -> BTreeMap<ConnId, Entity> {
        self.read()
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    /// Like `snapshot`, without the entry for `exclude`.
    pub fn snapshot_except(&self, exclude: &ConnId) -> BTreeMap<ConnId, Entity> {
        self.read()
            .iter()
            .filter(|(id, _)| *id != exclude)
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    pub fn get(&self, id: &ConnId) -> Option<Entity> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ConnId) -> bool {
        self.read().contains_key(id)
    }

    /// Joined ids in ascending order.
    pub fn ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use relay_shared::{entity::JoinRequest, math::Vec3};

    use super::*;

    fn id(s: &str) -> ConnId {
        ConnId::try_from(s).unwrap()
    }

    fn entity(s: &str, name: &str) -> Entity {
        JoinRequest {
            name: Some(name.into()),
            ..Default::default()
        }
        .into_entity(id(s))
    }

    fn pose(x: f32, heading: f32) -> PoseUpdate {
        PoseUpdate {
            position: Vec3::new(x, 0.4, 0.0),
            heading,
        }
    }

    #[test]
    fn put_then_rejoin_replaces() {
        let reg = Registry::new();
        assert!(reg.put(entity("a", "Bo")).is_none());
        let old = reg.put(entity("a", "Al")).unwrap();
        assert_eq!(old.name, "Bo");
        assert_eq!(reg.get(&id("a")).unwrap().name, "Al");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn patch_keeps_name_and_id() {
        let reg = Registry::new();
        reg.put(entity("a", "Bo"));
        let merged = reg.patch(&id("a"), pose(5.0, 1.57)).unwrap();
        assert_eq!(merged.name, "Bo");
        assert_eq!(merged.id, id("a"));
        assert_eq!(merged.position.x, 5.0);
        assert_eq!(merged.heading, 1.57);
        assert_eq!(reg.get(&id("a")).unwrap(), merged);
    }

    #[test]
    fn patch_absent_is_not_found() {
        let reg = Registry::new();
        assert_eq!(
            reg.patch(&id("ghost"), pose(1.0, 0.0)),
            Err(RegistryError::NotFound(id("ghost")))
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = Registry::new();
        reg.put(entity("a", "Bo"));
        assert!(reg.remove(&id("a")).is_some());
        assert!(reg.remove(&id("a")).is_none());
        assert!(!reg.contains(&id("a")));
    }

    #[test]
    fn snapshot_does_not_alias_storage() {
        let reg = Registry::new();
        reg.put(entity("a", "Bo"));
        let snap = reg.snapshot();

        reg.patch(&id("a"), pose(9.0, 2.0)).unwrap();
        reg.put(entity("b", "Cy"));

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[&id("a")].position, Vec3::new(0.0, 0.4, 0.0));
    }

    #[test]
    fn snapshot_except_skips_one_id() {
        let reg = Registry::new();
        reg.put(entity("a", "Bo"));
        reg.put(entity("b", "Cy"));
        let snap = reg.snapshot_except(&id("b"));
        assert_eq!(snap.keys().cloned().collect::<Vec<_>>(), vec![id("a")]);
    }

    #[test]
    fn concurrent_writers_leave_consistent_map() {
        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let me = id(&format!("t{t}"));
                    reg.put(entity(me.as_str(), "x"));
                    for i in 0..200 {
                        reg.patch(&me, pose(i as f32, 0.0)).unwrap();
                        let _ = reg.snapshot();
                    }
                    if t % 2 == 0 {
                        reg.remove(&me);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(reg.ids(), vec![id("t1"), id("t3"), id("t5"), id("t7")]);
        for e in reg.snapshot().values() {
            assert_eq!(e.position.x, 199.0);
        }
    }
}
