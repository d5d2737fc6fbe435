//! Server implementation.
//!
//! Task layout:
//! - Accept loop: owns the listener, spawns one task per connection.
//! - Connection task: races a reader (frames -> hub events) against a writer
//!   (outbound queue -> socket). Whichever finishes first ends the
//!   connection, after which `Close` is sent to the hub exactly once.
//! - Hub task: the only place broker state changes (see `hub`).
//!
//! Error isolation:
//! - A frame that fails to decode is reported as `Malformed` and the
//!   connection stays open.
//! - Read/write failures and oversized frames end that connection only.
//! - Only failing to bind the listener is fatal.

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use relay_shared::{
    config::RelayConfig,
    entity::ConnId,
    net::{ClientMsg, FrameReader, FrameWriter, ReliableListener},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    broker::{Broker, ConnEvent},
    hub::{Hub, HubCommand},
    registry::Registry,
};

/// Relay server bound to a listen address.
pub struct RelayServer {
    pub cfg: RelayConfig,
    listener: ReliableListener,
    registry: Arc<Registry>,
}

impl RelayServer {
    /// Binds the listener described by `cfg.server_addr`.
    pub async fn bind(cfg: RelayConfig) -> anyhow::Result<Self> {
        cfg.validate().context("invalid relay config")?;
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        Ok(Self {
            cfg,
            listener,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the registry, for status reporting.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Serves until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` completes, then drops every connection.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (hub_tx, hub_rx) = mpsc::channel(self.cfg.hub_queue_len);
        let hub = Hub::new(Broker::new(
            Arc::clone(&self.registry),
            self.cfg.max_malformed_frames,
        ));
        let hub_task = tokio::spawn(hub.run(hub_rx));

        let mut conns = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Relay shutting down");
                    break;
                }
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = ConnId::new_unique();
                        debug!(conn = %id, %peer, "Accepted connection");
                        conns.spawn(serve_connection(
                            id,
                            stream,
                            self.cfg.clone(),
                            hub_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }

        conns.shutdown().await;
        hub_task.abort();
        Ok(())
    }
}

/// Runs one connection from `Open` to `Close`.
async fn serve_connection(
    id: ConnId,
    stream: TcpStream,
    cfg: RelayConfig,
    hub: mpsc::Sender<HubCommand>,
) {
    let (read, write) = stream.into_split();
    serve_framed(id, read, write, &cfg, hub).await;
}

/// Transport-independent body of `serve_connection`.
pub async fn serve_framed<R, W>(
    id: ConnId,
    read: R,
    write: W,
    cfg: &RelayConfig,
    hub: mpsc::Sender<HubCommand>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (out_tx, out_rx) = mpsc::channel(cfg.outbound_queue_len);
    let open = HubCommand::Open {
        id: id.clone(),
        outbound: out_tx,
    };
    if hub.send(open).await.is_err() {
        return;
    }

    let mut reader = FrameReader::new(read, cfg.max_frame_len);
    let mut writer = FrameWriter::new(write);

    tokio::select! {
        res = read_loop(&id, &mut reader, &hub) => {
            if let Err(e) = res {
                warn!(conn = %id, error = %e, "Connection read failed");
            }
        }
        res = write_loop(&mut writer, out_rx) => {
            match res {
                Ok(()) => debug!(conn = %id, "Outbound queue dropped by hub"),
                Err(e) => warn!(conn = %id, error = %e, "Connection write failed"),
            }
        }
    }

    let _ = writer.shutdown().await;
    let _ = hub.send(HubCommand::Close { id }).await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    id: &ConnId,
    reader: &mut FrameReader<R>,
    hub: &mpsc::Sender<HubCommand>,
) -> anyhow::Result<()> {
    while let Some(frame) = reader.read_frame().await? {
        let event = match ClientMsg::decode(&frame) {
            Ok(msg) => ConnEvent::from(msg),
            Err(e) => {
                debug!(conn = %id, error = %e, "Undecodable frame");
                ConnEvent::Malformed
            }
        };
        hub.send(HubCommand::Event {
            id: id.clone(),
            event,
        })
        .await
        .context("hub closed")?;
    }
    Ok(())
}

async fn write_loop<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    mut rx: mpsc::Receiver<Bytes>,
) -> anyhow::Result<()> {
    while let Some(frame) = rx.recv().await {
        writer.write_frame(&frame).await?;
    }
    Ok(())
}

/// Human-readable registry dump for the `status` console command.
pub fn status_lines(registry: &Registry) -> Vec<String> {
    let players = registry.snapshot();
    let mut out = vec![format!("Players: {}", players.len())];
    for (id, e) in &players {
        out.push(format!(
            "  {}: name={} pos=({:.2}, {:.2}, {:.2}) heading={:.2}",
            id, e.name, e.position.x, e.position.y, e.position.z, e.heading
        ));
    }
    out
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(cfg: RelayConfig) -> anyhow::Result<(RelayServer, RelayConfig)> {
    let mut cfg = RelayConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        ..cfg
    };
    let server = RelayServer::bind(cfg.clone()).await?;
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
