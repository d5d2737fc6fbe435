//! `relay_client`
//!
//! Client-side systems:
//! - Connection management (`client`): welcome, join, pose updates
//! - Remote player tracking (`remote`)
//! - Car kinematics producing the poses to send (`drive`)
//!
//! Rendering is not part of this crate; a renderer would read `remote`.

pub mod client;
pub mod drive;
pub mod remote;

pub use client::RelayClient;
