//! Networking primitives.
//!
//! Goals:
//! - Provide the client and server message types of the relay protocol.
//! - Provide a reliable (TCP) channel with length-prefixed JSON frames.
//! - Keep serialization explicit and versionable.
//!
//! Frame layout: 4-byte big-endian payload length, then the JSON payload.
//! Reading and decoding are separate steps so callers can tell a broken
//! stream apart from a payload that merely failed to parse.

use std::{collections::BTreeMap, io, net::SocketAddr};

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};
use tracing::debug;

use crate::{
    entity::{ConnId, Entity, JoinRequest, PoseUpdate},
    math::Vec3,
};

/// Protocol version announced in `Welcome`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Client -> server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMsg {
    /// Announce the player; creates its entity.
    Join(JoinRequest),
    /// New pose for the sender's entity.
    Update(PoseUpdate),
}

impl ClientMsg {
    /// Decodes a frame payload and rejects poses that cannot be re-encoded.
    ///
    /// JSON overflow such as `1e39` parses into an `f32` as infinity, which
    /// serde_json would later write back out as `null`.
    pub fn decode(payload: &[u8]) -> anyhow::Result<Self> {
        let msg: Self = decode_payload(payload)?;
        let finite = match &msg {
            ClientMsg::Join(req) => req.is_finite(),
            ClientMsg::Update(pose) => pose.is_finite(),
        };
        if !finite {
            anyhow::bail!("non-finite pose");
        }
        Ok(msg)
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMsg {
    /// First message on every connection: the id the server assigned.
    Welcome { id: ConnId, protocol: u32 },
    /// Every other joined player, sent once to a joiner.
    Snapshot { players: BTreeMap<ConnId, Entity> },
    /// Another player joined (or re-joined).
    PlayerJoined(Entity),
    /// Another player's pose changed.
    PlayerMoved {
        id: ConnId,
        position: Vec3,
        heading: f32,
    },
    /// Another player's connection closed.
    PlayerLeft { id: ConnId },
}

/// Serializes `msg` into a complete frame (length prefix included).
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let len = u32::try_from(payload.len()).context("frame too large")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Parses a frame payload (without the length prefix).
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(payload).context("deserialize msg")
}

/// Reading half of a framed stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Reads one frame payload. `Ok(None)` means the peer closed the stream.
    ///
    /// Oversized frames are an error: the stream cannot be resynchronized
    /// without reading the whole payload.
    pub async fn read_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("tcp read len"),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_len {
            debug!(len, max = self.max_len, "Oversized frame rejected");
            anyhow::bail!("frame of {len} bytes exceeds limit of {}", self.max_len);
        }
        let mut payload = vec![0u8; len];
        self.inner
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        Ok(Some(Bytes::from(payload)))
    }

    /// Reads and decodes one message. `Ok(None)` on clean close.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<T>> {
        match self.read_frame().await? {
            Some(payload) => decode_payload(&payload).map(Some),
            None => Ok(None),
        }
    }
}

/// Writing half of a framed stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes an already encoded frame (see `encode_frame`).
    pub async fn write_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.inner.write_all(frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        self.write_frame(&frame).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.inner.shutdown().await.context("tcp shutdown")?;
        Ok(())
    }
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl ReliableConn {
    pub fn new(stream: TcpStream, max_frame_len: usize) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().context("peer addr")?;
        stream.set_nodelay(true).context("set nodelay")?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read, max_frame_len),
            writer: FrameWriter::new(write),
            peer,
        })
    }

    pub async fn connect(addr: SocketAddr, max_frame_len: usize) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Self::new(stream, max_frame_len)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
