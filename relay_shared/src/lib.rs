//! `relay_shared`
//!
//! Shared libraries used by both the relay server and its clients.
//!
//! Design goals:
//! - One explicit, versioned wire protocol (`net`).
//! - Plain data types with serde derives (`entity`, `math`).
//! - Config loadable from JSON with every field defaulted (`config`).
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod math;
pub mod net;
