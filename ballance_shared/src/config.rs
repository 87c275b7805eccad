//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files; binaries layer CLI
//! flags on top.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::physics::PhysicsConfig;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:3000`.
    pub server_addr: String,
    /// Fixed tick interval in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Path to the level file.
    #[serde(default = "default_level_path")]
    pub level_path: String,
    #[serde(default)]
    pub physics: PhysicsConfig,
}

fn default_tick_ms() -> u64 {
    25
}

fn default_level_path() -> String {
    "levels/world.json".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            tick_ms: default_tick_ms(),
            level_path: default_level_path(),
            physics: PhysicsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}
