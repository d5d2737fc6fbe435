//! Event broker.
//!
//! Turns connection-level events into registry operations and decides who
//! hears about them. The broker does no I/O: every handler returns the
//! deliveries it wants as `Outbound` values and the hub performs them. This
//! keeps the per-connection state machine testable without sockets.
//!
//! Per-connection phases:
//! - `Connected`: transport open, no entity yet.
//! - `Joined`: entity present in the registry.
//! - closed: the connection is no longer tracked and owns no entity.
//!
//! Events for connections that are not in a phase where they make sense are
//! dropped, never reported as errors.

use std::{collections::BTreeMap, sync::Arc};

use relay_shared::{
    entity::{ConnId, JoinRequest, PoseUpdate},
    net::{ClientMsg, ServerMsg, PROTOCOL_VERSION},
};
use tracing::{debug, info, warn};

use crate::registry::{Registry, RegistryError};

/// Something that happened on one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnEvent {
    /// Transport accepted.
    Open,
    Join(JoinRequest),
    Update(PoseUpdate),
    /// A frame arrived that did not decode as a `ClientMsg`.
    Malformed,
    /// Transport closed, for any reason.
    Close,
}

impl From<ClientMsg> for ConnEvent {
    fn from(msg: ClientMsg) -> Self {
        match msg {
            ClientMsg::Join(req) => ConnEvent::Join(req),
            ClientMsg::Update(pose) => ConnEvent::Update(pose),
        }
    }
}

/// A delivery requested by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send to exactly one connection.
    Unicast { to: ConnId, msg: ServerMsg },
    /// Send the same message to each target, in order.
    Fanout { targets: Vec<ConnId>, msg: ServerMsg },
    /// Drop the connection; its `Close` event will follow.
    Disconnect { id: ConnId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
    Connected,
    Joined,
}

#[derive(Debug)]
struct ConnState {
    phase: ConnPhase,
    malformed_streak: u32,
}

/// Broker state: the registry plus the set of open connections.
pub struct Broker {
    registry: Arc<Registry>,
    conns: BTreeMap<ConnId, ConnState>,
    max_malformed_frames: u32,
}

impl Broker {
    /// `max_malformed_frames == 0` never force-disconnects.
    pub fn new(registry: Arc<Registry>, max_malformed_frames: u32) -> Self {
        Self {
            registry,
            conns: BTreeMap::new(),
            max_malformed_frames,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Phase of an open connection, `None` once closed or if never opened.
    pub fn phase(&self, id: &ConnId) -> Option<ConnPhase> {
        self.conns.get(id).map(|c| c.phase)
    }

    pub fn open_connections(&self) -> usize {
        self.conns.len()
    }

    /// Routes one event to its handler.
    pub fn handle(&mut self, id: &ConnId, event: ConnEvent) -> Vec<Outbound> {
        if !matches!(event, ConnEvent::Malformed | ConnEvent::Close) {
            if let Some(conn) = self.conns.get_mut(id) {
                conn.malformed_streak = 0;
            }
        }

        match event {
            ConnEvent::Open => self.on_open(id),
            ConnEvent::Join(req) => self.on_join(id, req),
            ConnEvent::Update(pose) => self.on_update(id, pose),
            ConnEvent::Malformed => self.on_malformed(id),
            ConnEvent::Close => self.on_close(id),
        }
    }

    fn on_open(&mut self, id: &ConnId) -> Vec<Outbound> {
        self.conns.insert(
            id.clone(),
            ConnState {
                phase: ConnPhase::Connected,
                malformed_streak: 0,
            },
        );
        info!(conn = %id, "Player connected");
        vec![Outbound::Unicast {
            to: id.clone(),
            msg: ServerMsg::Welcome {
                id: id.clone(),
                protocol: PROTOCOL_VERSION,
            },
        }]
    }

    fn on_join(&mut self, id: &ConnId, req: JoinRequest) -> Vec<Outbound> {
        let Some(conn) = self.conns.get_mut(id) else {
            debug!(conn = %id, "Join from closed connection dropped");
            return Vec::new();
        };
        conn.phase = ConnPhase::Joined;

        let entity = req.into_entity(id.clone());
        if self.registry.put(entity.clone()).is_some() {
            debug!(conn = %id, "Re-join replaced existing entity");
        }
        info!(conn = %id, name = %entity.name, "New player joined");

        let mut out = vec![Outbound::Unicast {
            to: id.clone(),
            msg: ServerMsg::Snapshot {
                players: self.registry.snapshot_except(id),
            },
        }];
        out.extend(self.fanout(id, ServerMsg::PlayerJoined(entity)));
        out
    }

    fn on_update(&mut self, id: &ConnId, pose: PoseUpdate) -> Vec<Outbound> {
        match self.registry.patch(id, pose) {
            Ok(entity) => self
                .fanout(
                    id,
                    ServerMsg::PlayerMoved {
                        id: entity.id,
                        position: entity.position,
                        heading: entity.heading,
                    },
                )
                .into_iter()
                .collect(),
            Err(RegistryError::NotFound(_)) => {
                debug!(conn = %id, "Update without entity dropped");
                Vec::new()
            }
        }
    }

    fn on_malformed(&mut self, id: &ConnId) -> Vec<Outbound> {
        let Some(conn) = self.conns.get_mut(id) else {
            return Vec::new();
        };
        conn.malformed_streak += 1;
        warn!(conn = %id, streak = conn.malformed_streak, "Malformed frame dropped");

        if self.max_malformed_frames > 0 && conn.malformed_streak >= self.max_malformed_frames {
            warn!(conn = %id, "Too many malformed frames, disconnecting");
            return vec![Outbound::Disconnect { id: id.clone() }];
        }
        Vec::new()
    }

    fn on_close(&mut self, id: &ConnId) -> Vec<Outbound> {
        let was_open = self.conns.remove(id).is_some();
        let removed = self.registry.remove(id);
        if was_open {
            info!(conn = %id, "Player disconnected");
        }

        match removed {
            Some(_) => self
                .fanout(id, ServerMsg::PlayerLeft { id: id.clone() })
                .into_iter()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Fan-out to every open connection except `origin`; `None` when there
    /// is nobody to tell.
    fn fanout(&self, origin: &ConnId, msg: ServerMsg) -> Option<Outbound> {
        let targets: Vec<ConnId> = self
            .conns
            .keys()
            .filter(|c| *c != origin)
            .cloned()
            .collect();
        if targets.is_empty() {
            return None;
        }
        debug!(origin = %origin, targets = targets.len(), "Fan-out");
        Some(Outbound::Fanout { targets, msg })
    }
}
