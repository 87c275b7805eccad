//! `ballance_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (level, snapshot, net, math, config).
//! - One definition of every wire format, used by both ends.
//! - No `unsafe`.

pub mod config;
pub mod error;
pub mod input;
pub mod level;
pub mod math;
pub mod net;
pub mod physics;
pub mod snapshot;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::input::*;
    pub use crate::level::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::physics::*;
}
