//! `relay_server`
//!
//! Server-side systems:
//! - Connection registry (`registry`): the only shared mutable state
//! - Event broker (`broker`): join/update/leave state machine, no I/O
//! - Hub (`hub`): single task applying broker transitions and fanning out
//! - Server (`server`): TCP accept loop and per-connection tasks
//!
//! Networking model:
//! - TCP, length-prefixed JSON frames (see `relay_shared::net`)
//! - One global world, no persistence

pub mod broker;
pub mod hub;
pub mod registry;
pub mod server;

pub use server::RelayServer;
