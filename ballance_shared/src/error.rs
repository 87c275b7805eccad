//! Domain error taxonomy.
//!
//! Only `LevelLoadError` is fatal (startup). Everything else is scoped to one
//! connection or one message and must never cross a session boundary.

use std::path::PathBuf;

/// The level file is missing or is not a well-formed level document.
#[derive(Debug, thiserror::Error)]
pub enum LevelLoadError {
    #[error("failed to read level file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed level data: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Every player body is already claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("server full: all {capacity} player slots are taken")]
pub struct CapacityError {
    pub capacity: usize,
}

/// A client input message that cannot be applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidInputError {
    #[error("heading [{0}, {1}] is not a finite XZ vector")]
    Heading(f32, f32),
    #[error("unknown key token {0:?}")]
    UnknownKey(String),
    #[error("unknown session")]
    UnknownSession,
    #[error("input for a session not owned by the sender")]
    NotOwner,
}

/// A world-state buffer that does not match the snapshot layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolDecodeError {
    #[error("buffer of {0} bytes is not a whole number of 32-bit floats")]
    UnalignedBytes(usize),
    #[error("buffer of {0} floats is not a multiple of 13")]
    PartialRecord(usize),
}
