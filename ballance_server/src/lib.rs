//! `ballance_server`
//!
//! Server-side systems:
//! - Level materialization into a rapier world
//! - Force zone bookkeeping driven by contact events
//! - Session table (player slots, stored input, game start)
//! - Fixed-interval simulation clock and snapshot broadcast
//!
//! Networking model:
//! - TCP: handshake/control plane
//! - UDP: gameplay plane (input in, snapshots out)

pub mod clock;
pub mod ledger;
pub mod materialize;
pub mod server;
pub mod session;
pub mod world;

pub use clock::Simulation;
pub use server::GameServer;
