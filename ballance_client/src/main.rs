//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p ballance_client -- [--addr 127.0.0.1:3000] [--config client.json]
//!
//! The client connects, waits for the game to start, then sends its input
//! state every tick and mirrors the world-state snapshots it receives.
//!
//! Console commands:
//!   keys [w] [a] [s] [d] - Set held movement keys (none releases all)
//!   yaw <radians>        - Set camera yaw
//!   ping                 - Ping the server
//!   status               - Show client status
//!   quit                 - Disconnect and exit

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use ballance_client::client::{ClientState, ConsoleReply, GameClient};
use ballance_shared::config::EngineConfig;
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = cfg.tick_interval();
    let mut reported: u64 = 0;

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match client.exec_console(&line).await {
                Ok(ConsoleReply::Lines(lines)) => {
                    for line in lines {
                        println!("{line}");
                    }
                }
                Ok(ConsoleReply::Quit) => {
                    client.disconnect("client quit").await?;
                    return Ok(());
                }
                Err(e) => println!("Error: {e}"),
            }
        }

        while client.poll_reliable(Duration::from_millis(1)).await? {}

        match client.state {
            ClientState::Disconnected => {
                println!("Disconnected from server.");
                break;
            }
            ClientState::Waiting => {}
            ClientState::Playing => {
                if let Err(e) = client.send_input().await {
                    println!("Input error: {e}");
                }
                if let Err(e) = client.recv_world_state(tick_interval).await {
                    println!("World state error: {e}");
                }
                if let Some(mirror) = &client.mirror {
                    let updates = mirror.updates();
                    if updates >= reported + 40 {
                        reported = updates;
                        if let Some(own) = mirror.own() {
                            let p = own.state.position;
                            info!(updates, x = p.x, y = p.y, z = p.z, "Own body");
                        }
                    }
                }
                continue;
            }
        }

        tokio::time::sleep(tick_interval).await;
    }

    Ok(())
}
