//! Physics tuning.
//!
//! Constants shared by the simulation clock and the materializer. All of it
//! is plain data so it can live inside `EngineConfig`.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Physics parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    /// Radius of every player ball.
    pub player_radius: f32,
    pub player_mass: f32,
    /// Mass of world objects whose behaviour is not `static`.
    pub dynamic_object_mass: f32,
    /// Force along the stored heading per held key, before scaling by delta.
    pub move_force: f32,
    /// Linear speed bound applied after every step.
    pub max_linear_speed: f32,
    /// Upper bound for one tick's delta, in seconds.
    pub max_tick_delta: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.82, 0.0),
            player_radius: 0.5,
            player_mass: 1.0,
            dynamic_object_mass: 1.0,
            move_force: 500.0,
            max_linear_speed: 100.0,
            max_tick_delta: 0.25,
        }
    }
}
