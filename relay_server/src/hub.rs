//! Relay hub.
//!
//! The hub is the single task that owns the broker and the outbound queue of
//! every open connection. Connection tasks feed it `HubCommand`s; it applies
//! them strictly one at a time, which gives every receiver the broker's
//! processing order.
//!
//! Delivery never awaits: each message is encoded once and pushed with
//! `try_send` into the bounded per-connection queues. A connection whose
//! queue is full is too slow to keep up and gets disconnected by dropping
//! its queue; its writer then drains what is buffered and ends, and the
//! connection task reports `Close`.

use std::collections::HashMap;

use bytes::Bytes;
use relay_shared::{
    entity::ConnId,
    net::{encode_frame, ServerMsg},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::broker::{Broker, ConnEvent, Outbound};

/// Commands sent from connection tasks to the hub.
#[derive(Debug)]
pub enum HubCommand {
    /// New connection and the sending side of its outbound queue.
    Open {
        id: ConnId,
        outbound: mpsc::Sender<Bytes>,
    },
    Event {
        id: ConnId,
        event: ConnEvent,
    },
    /// Sent exactly once per connection, after its socket is done.
    Close {
        id: ConnId,
    },
}

pub struct Hub {
    broker: Broker,
    queues: HashMap<ConnId, mpsc::Sender<Bytes>>,
}

impl Hub {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            queues: HashMap::new(),
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Processes commands until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        while let Some(cmd) = rx.recv().await {
            self.apply(cmd);
        }
        debug!("Hub channel closed");
    }

    /// Applies one command: broker transition plus deliveries.
    pub fn apply(&mut self, cmd: HubCommand) {
        let out = match cmd {
            HubCommand::Open { id, outbound } => {
                self.queues.insert(id.clone(), outbound);
                self.broker.handle(&id, ConnEvent::Open)
            }
            HubCommand::Event { id, event } => self.broker.handle(&id, event),
            HubCommand::Close { id } => {
                self.queues.remove(&id);
                self.broker.handle(&id, ConnEvent::Close)
            }
        };
        self.deliver(out);
    }

    fn deliver(&mut self, out: Vec<Outbound>) {
        for o in out {
            match o {
                Outbound::Unicast { to, msg } => {
                    if let Some(frame) = encode(&msg) {
                        self.push(&to, frame);
                    }
                }
                Outbound::Fanout { targets, msg } => {
                    let Some(frame) = encode(&msg) else {
                        continue;
                    };
                    for to in &targets {
                        self.push(to, frame.clone());
                    }
                }
                Outbound::Disconnect { id } => {
                    self.queues.remove(&id);
                }
            }
        }
    }

    fn push(&mut self, to: &ConnId, frame: Bytes) {
        let Some(queue) = self.queues.get(to) else {
            // Already evicted or closing; the broadcast is abandoned.
            return;
        };
        match queue.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn = %to, "Outbound queue full, disconnecting slow connection");
                self.queues.remove(to);
            }
            Err(TrySendError::Closed(_)) => {
                self.queues.remove(to);
            }
        }
    }
}

fn encode(msg: &ServerMsg) -> Option<Bytes> {
    match encode_frame(msg) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "Failed to encode server message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_shared::{
        entity::{JoinRequest, PoseUpdate},
        math::Vec3,
        net::decode_payload,
    };
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::registry::Registry;

    fn id(s: &str) -> ConnId {
        ConnId::try_from(s).unwrap()
    }

    fn hub() -> Hub {
        Hub::new(Broker::new(Arc::new(Registry::new()), 0))
    }

    fn open(hub: &mut Hub, s: &str, cap: usize) -> (ConnId, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(cap);
        let c = id(s);
        hub.apply(HubCommand::Open {
            id: c.clone(),
            outbound: tx,
        });
        (c, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            msgs.push(decode_payload(&frame[4..]).unwrap());
        }
        msgs
    }

    fn moved(hub: &mut Hub, who: &ConnId, x: f32) {
        hub.apply(HubCommand::Event {
            id: who.clone(),
            event: ConnEvent::Update(PoseUpdate {
                position: Vec3::new(x, 0.4, 0.0),
                heading: 0.0,
            }),
        });
    }

    #[test]
    fn join_flow_reaches_queues() {
        let mut hub = hub();
        let (a, mut rx_a) = open(&mut hub, "a", 16);
        let (b, mut rx_b) = open(&mut hub, "b", 16);
        hub.apply(HubCommand::Event {
            id: a.clone(),
            event: ConnEvent::Join(JoinRequest::default()),
        });

        let got_a = drain(&mut rx_a);
        assert!(matches!(got_a[0], ServerMsg::Welcome { .. }));
        assert!(matches!(&got_a[1], ServerMsg::Snapshot { players } if players.is_empty()));

        let got_b = drain(&mut rx_b);
        assert_eq!(got_b.len(), 2);
        assert!(matches!(&got_b[1], ServerMsg::PlayerJoined(e) if e.id == a));
        assert_eq!(hub.broker().phase(&b), Some(crate::broker::ConnPhase::Connected));
    }

    #[test]
    fn updates_arrive_in_processing_order() {
        let mut hub = hub();
        let (a, _rx_a) = open(&mut hub, "a", 64);
        let (_b, mut rx_b) = open(&mut hub, "b", 64);
        hub.apply(HubCommand::Event {
            id: a.clone(),
            event: ConnEvent::Join(JoinRequest::default()),
        });
        drain(&mut rx_b);

        for i in 0..20 {
            moved(&mut hub, &a, i as f32);
        }
        let xs: Vec<f32> = drain(&mut rx_b)
            .into_iter()
            .map(|m| match m {
                ServerMsg::PlayerMoved { position, .. } => position.x,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(xs, (0..20).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn slow_connection_is_evicted_without_affecting_others() {
        let mut hub = hub();
        let (a, _rx_a) = open(&mut hub, "a", 64);
        // Room for the welcome and join notice only.
        let (slow, mut rx_slow) = open(&mut hub, "slow", 2);
        let (_fast, mut rx_fast) = open(&mut hub, "fast", 64);
        hub.apply(HubCommand::Event {
            id: a.clone(),
            event: ConnEvent::Join(JoinRequest::default()),
        });

        for i in 0..10 {
            moved(&mut hub, &a, i as f32);
        }

        let fast_moves = drain(&mut rx_fast)
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::PlayerMoved { .. }))
            .count();
        assert_eq!(fast_moves, 10);

        // The slow queue kept what fit, then its sender was dropped.
        assert_eq!(drain(&mut rx_slow).len(), 2);
        assert_eq!(rx_slow.try_recv(), Err(TryRecvError::Disconnected));

        // The evicted connection still leaves exactly once via Close.
        hub.apply(HubCommand::Close { id: slow.clone() });
        assert_eq!(hub.broker().phase(&slow), None);
    }

    #[test]
    fn close_fans_out_leave_once() {
        let mut hub = hub();
        let (a, _rx_a) = open(&mut hub, "a", 16);
        let (_b, mut rx_b) = open(&mut hub, "b", 16);
        hub.apply(HubCommand::Event {
            id: a.clone(),
            event: ConnEvent::Join(JoinRequest::default()),
        });
        drain(&mut rx_b);

        hub.apply(HubCommand::Close { id: a.clone() });
        hub.apply(HubCommand::Close { id: a.clone() });
        assert_eq!(drain(&mut rx_b), vec![ServerMsg::PlayerLeft { id: a }]);
    }
}
