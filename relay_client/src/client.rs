//! Client implementation.
//!
//! The client maintains:
//! - A framed TCP connection to the relay
//! - A background reader task feeding decoded messages into a channel, so
//!   waiting with a timeout never cuts a frame in half
//! - The table of remote players, updated as messages are polled

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use relay_shared::{
    config::RelayConfig,
    entity::{ConnId, JoinRequest, PoseUpdate},
    net::{ClientMsg, FrameWriter, ReliableConn, ServerMsg, PROTOCOL_VERSION},
};
use tokio::{
    net::tcp::OwnedWriteHalf,
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
    time,
};
use tracing::{debug, info};

use crate::remote::RemotePlayers;

/// How long `connect` waits for the server's welcome.
const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// High-level relay client.
pub struct RelayClient {
    /// Id the relay assigned to this connection.
    pub id: ConnId,
    pub remote: RemotePlayers,
    writer: FrameWriter<OwnedWriteHalf>,
    inbox: mpsc::Receiver<anyhow::Result<ServerMsg>>,
    reader: JoinHandle<()>,
}

impl RelayClient {
    /// Connects to the relay and waits for its welcome.
    pub async fn connect(cfg: &RelayConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to relay");

        let conn = ReliableConn::connect(server_addr, cfg.max_frame_len).await?;
        debug!(peer = %conn.peer_addr(), "TCP connected");
        let (mut frames, writer) = conn.into_split();

        let (tx, mut inbox) = mpsc::channel(256);
        let reader = tokio::spawn(async move {
            loop {
                match frames.recv::<ServerMsg>().await {
                    Ok(Some(msg)) => {
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let welcome = time::timeout(WELCOME_TIMEOUT, inbox.recv())
            .await
            .context("timed out waiting for welcome")?
            .context("connection closed before welcome")??;
        let id = match welcome {
            ServerMsg::Welcome { id, protocol } if protocol == PROTOCOL_VERSION => id,
            ServerMsg::Welcome { protocol, .. } => {
                reader.abort();
                anyhow::bail!("relay speaks protocol {protocol}, expected {PROTOCOL_VERSION}")
            }
            other => {
                reader.abort();
                anyhow::bail!("expected Welcome, got {other:?}")
            }
        };

        info!(client_id = %id, "Connected to relay");
        Ok(Self {
            remote: RemotePlayers::new(id.clone()),
            id,
            writer,
            inbox,
            reader,
        })
    }

    /// Announces this player to the relay.
    pub async fn join(&mut self, req: JoinRequest) -> anyhow::Result<()> {
        self.writer.send(&ClientMsg::Join(req)).await
    }

    /// Sends the current pose.
    pub async fn send_update(&mut self, pose: PoseUpdate) -> anyhow::Result<()> {
        self.writer.send(&ClientMsg::Update(pose)).await
    }

    /// Sends raw bytes as one frame payload, bypassing message encoding.
    pub async fn send_raw_payload(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let len = u32::try_from(payload.len()).context("payload too large")?;
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);
        self.writer.write_frame(&frame).await
    }

    /// Waits up to `timeout` for the next message and applies it to the
    /// remote table. `Ok(None)` on timeout.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<Option<ServerMsg>> {
        match time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(msg)) => self.accept(msg).map(Some),
            Ok(None) => anyhow::bail!("relay closed the connection"),
            Err(_) => Ok(None),
        }
    }

    /// Like `poll`, but only takes what has already arrived.
    pub fn try_poll(&mut self) -> anyhow::Result<Option<ServerMsg>> {
        match self.inbox.try_recv() {
            Ok(msg) => self.accept(msg).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => anyhow::bail!("relay closed the connection"),
        }
    }

    fn accept(&mut self, msg: anyhow::Result<ServerMsg>) -> anyhow::Result<ServerMsg> {
        let msg = msg?;
        if self.remote.apply(&msg) {
            debug!(online = self.remote.online_count(), "Remote players changed");
        }
        Ok(msg)
    }

    /// Closes the write side; the relay treats this as a disconnect.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
