//! Remote player table.
//!
//! The client's view of every other player, kept current by applying the
//! server's notices in arrival order. A renderer would draw one car per
//! entry; the headless client only counts and inspects them.

use std::collections::BTreeMap;

use relay_shared::{
    entity::{ConnId, Entity},
    net::ServerMsg,
};

/// Other players known to this client.
#[derive(Debug, Default)]
pub struct RemotePlayers {
    self_id: Option<ConnId>,
    players: BTreeMap<ConnId, Entity>,
}

impl RemotePlayers {
    pub fn new(self_id: ConnId) -> Self {
        Self {
            self_id: Some(self_id),
            players: BTreeMap::new(),
        }
    }

    fn is_self(&self, id: &ConnId) -> bool {
        self.self_id.as_ref() == Some(id)
    }

    /// Applies one server message. Returns true if the table changed.
    pub fn apply(&mut self, msg: &ServerMsg) -> bool {
        match msg {
            ServerMsg::Welcome { id, .. } => {
                self.self_id = Some(id.clone());
                self.players.remove(id).is_some()
            }
            ServerMsg::Snapshot { players } => {
                let mut changed = false;
                for (id, entity) in players {
                    // Entries learned from notices are newer than the snapshot.
                    if self.is_self(id) || self.players.contains_key(id) {
                        continue;
                    }
                    self.players.insert(id.clone(), entity.clone());
                    changed = true;
                }
                changed
            }
            ServerMsg::PlayerJoined(entity) => {
                if self.is_self(&entity.id) {
                    return false;
                }
                self.players.insert(entity.id.clone(), entity.clone());
                true
            }
            ServerMsg::PlayerMoved {
                id,
                position,
                heading,
            } => match self.players.get_mut(id) {
                Some(e) => {
                    e.position = *position;
                    e.heading = *heading;
                    true
                }
                None => false,
            },
            ServerMsg::PlayerLeft { id } => self.players.remove(id).is_some(),
        }
    }

    pub fn get(&self, id: &ConnId) -> Option<&Entity> {
        self.players.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.players.values()
    }

    /// Number of remote players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Players online including this client.
    pub fn online_count(&self) -> usize {
        self.players.len() + 1
    }
}
