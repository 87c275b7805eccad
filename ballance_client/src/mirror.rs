//! World mirror.
//!
//! Client-side copy of the server's bodies. It is built from the level
//! carried by `StartGame`, keeping only descriptors the server turns into
//! bodies, in file order. That is the server's creation order, so snapshot
//! record `i` overwrites entry `i`.

use ballance_shared::{
    error::LevelLoadError,
    level::{BodyRole, Level},
    math::Vec3,
    net::{BodyId, StartGame},
    snapshot::BodyState,
};
use tracing::warn;

/// One mirrored body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirrorEntry {
    /// Position of the source descriptor in the level's `entities` array.
    pub descriptor_index: usize,
    pub role: BodyRole,
    pub state: BodyState,
}

#[derive(Debug, Clone)]
pub struct WorldMirror {
    entries: Vec<MirrorEntry>,
    own_index: usize,
    own_body: BodyId,
    updates: u64,
    mismatches: u64,
}

impl WorldMirror {
    pub fn from_start(start: &StartGame) -> Result<Self, LevelLoadError> {
        let level = Level::from_value(start.level.clone())?;
        Ok(Self::from_level(
            &level,
            start.snapshot_index as usize,
            start.physics_body_id,
        ))
    }

    pub fn from_level(level: &Level, own_index: usize, own_body: BodyId) -> Self {
        let entries = level
            .entities()
            .iter()
            .enumerate()
            .filter_map(|(descriptor_index, desc)| {
                let role = desc.classify().ok()?;
                let (position, orientation) = desc.pose();
                Some(MirrorEntry {
                    descriptor_index,
                    role,
                    state: BodyState {
                        position,
                        orientation,
                        linear_velocity: Vec3::ZERO,
                        angular_velocity: Vec3::ZERO,
                    },
                })
            })
            .collect();
        Self {
            entries,
            own_index,
            own_body,
            updates: 0,
            mismatches: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MirrorEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&MirrorEntry> {
        self.entries.get(index)
    }

    /// The body this client controls.
    pub fn own(&self) -> Option<&MirrorEntry> {
        self.entries.get(self.own_index)
    }

    pub fn own_body(&self) -> BodyId {
        self.own_body
    }

    /// Snapshots applied so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Snapshots whose body count differed from the mirror's.
    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }

    /// Overwrites entries by index. Returns how many were written.
    ///
    /// A snapshot with a different body count still updates the common
    /// prefix.
    pub fn apply(&mut self, states: &[BodyState]) -> usize {
        if states.len() != self.entries.len() {
            self.mismatches += 1;
            warn!(
                snapshot = states.len(),
                mirror = self.entries.len(),
                "Snapshot body count differs from mirror"
            );
        }
        let mut written = 0;
        for (entry, state) in self.entries.iter_mut().zip(states) {
            entry.state = *state;
            written += 1;
        }
        self.updates += 1;
        written
    }
}
