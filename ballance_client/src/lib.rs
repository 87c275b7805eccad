//! `ballance_client`
//!
//! Headless client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Input state and `InputMsg` generation
//! - World mirror fed by world-state snapshots
//!
//! No rendering, camera rig or window input lives here.

pub mod client;
pub mod input;
pub mod mirror;

pub use client::GameClient;
