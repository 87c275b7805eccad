//! Shared fixtures for the integration tests.

use std::time::Duration;

use anyhow::bail;
use ballance_client::{client::ClientState, GameClient};
use ballance_server::GameServer;
use ballance_shared::{config::EngineConfig, level::Level};
use tokio::time::{self, Instant};

/// Two spawns on a large static floor, plus one entity of an unknown type.
pub const TWO_PLAYER_LEVEL: &str = r#"{
    "entities": [
        {
            "type": "Ballance$WorldObject", "behaviour": "static",
            "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 100, "y": 0.5, "z": 100 } },
            "position": { "x": 0, "y": -0.5, "z": 0 }
        },
        { "type": "Ballance$PlayerSpawn", "position": { "x": 0, "y": 0.5, "z": 0 } },
        { "type": "Ballance$PlayerSpawn", "position": { "x": 0, "y": 0.5, "z": 10 } },
        { "type": "Ballance$Checkpoint", "position": { "x": 5, "y": 0, "z": 5 } },
        {
            "type": "Ballance$ForceZone",
            "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 2, "y": 2, "z": 2 } },
            "position": { "x": -20, "y": 0, "z": 0 },
            "magnitude": { "x": 0, "y": 30, "z": 0 }
        }
    ]
}"#;

/// Bodies the server builds from [`TWO_PLAYER_LEVEL`].
pub const TWO_PLAYER_BODIES: usize = 4;

/// A level nobody can join.
pub const NO_SPAWN_LEVEL: &str = r#"{
    "entities": [
        {
            "type": "Ballance$WorldObject", "behaviour": "static",
            "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 5, "y": 0.5, "z": 5 } },
            "position": { "x": 0, "y": 0, "z": 0 }
        }
    ]
}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub fn level(json: &str) -> Level {
    match Level::from_json_str(json) {
        Ok(level) => level,
        Err(e) => panic!("fixture level does not parse: {e}"),
    }
}

/// Client config pointing at a bound server.
pub fn client_config(server: &GameServer) -> EngineConfig {
    EngineConfig {
        server_addr: server.local_addr().to_string(),
        ..Default::default()
    }
}

/// Polls the control stream until the client is playing.
pub async fn wait_until_playing(client: &mut GameClient, timeout: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    while client.state != ClientState::Playing {
        if Instant::now() >= deadline {
            bail!("client never received StartGame (state {:?})", client.state);
        }
        client.poll_reliable(Duration::from_millis(20)).await?;
    }
    Ok(())
}

/// Polls the control stream until a `Pong` with `payload` arrives.
pub async fn wait_for_pong(
    client: &mut GameClient,
    payload: &serde_json::Value,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    while client.last_pong.as_ref() != Some(payload) {
        if Instant::now() >= deadline {
            bail!("no pong for {payload}");
        }
        client.poll_reliable(Duration::from_millis(20)).await?;
    }
    Ok(())
}

/// Polls until `check` holds, yielding between attempts.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
}
