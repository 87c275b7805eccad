//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p ballance_server -- [--config server.json] [--addr 127.0.0.1:3000]
//!                                   [--tick-ms 25] [--level levels/world.json]
//!
//! Flags override values from `--config`.
//!
//! Console commands:
//!   status         - Show server status
//!   quit           - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use ballance_server::GameServer;
use ballance_shared::{config::EngineConfig, level::Level};
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::load(&args[i + 1])?,
        _ => EngineConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                cfg.tick_ms = args[i + 1].parse().unwrap_or(cfg.tick_ms);
                i += 2;
            }
            "--level" if i + 1 < args.len() => {
                cfg.level_path = args[i + 1].clone();
                i += 2;
            }
            "--config" => i += 2,
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_ms = cfg.tick_ms, level = %cfg.level_path, "Starting server");

    let level = Level::load(&cfg.level_path)
        .with_context(|| format!("load level {}", cfg.level_path))?;
    info!(entities = level.entities().len(), spawns = level.spawn_count(), "Level loaded");

    let mut server = GameServer::bind(cfg, level).await.context("create server")?;
    info!(local = %server.local_addr(), "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    server.run(console_rx).await
}
