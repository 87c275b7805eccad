//! Server implementation.
//!
//! Authoritative tick-based server. It owns:
//! - the simulation (physics world + force ledger), touched only by the tick
//! - the session table, shared with the network tasks behind a mutex
//! - one TCP listener and one UDP socket bound to the same port
//!
//! Network tasks:
//! - accept loop, one task per control connection plus a writer task draining
//!   that session's outbound queue
//! - UDP input task
//!
//! The tick never awaits a client: control messages are queued with
//! `try_send`, snapshots go out as datagrams.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use ballance_shared::{
    config::EngineConfig,
    level::Level,
    net::{
        decode_from_bytes, FrameReader, FrameWriter, NetMsg, ReliableConn, ReliableListener,
        SessionId, MAX_DATAGRAM_LEN, PROTOCOL_VERSION,
    },
    snapshot::BYTES_PER_BODY,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    clock::{ClockState, Simulation},
    materialize::MaterializeReport,
    session::SessionTable,
};

/// Session table shared between the tick and the network tasks.
pub type SharedSessions = Arc<Mutex<SessionTable>>;

/// Control messages queued per session; further messages are dropped.
const OUTBOUND_QUEUE: usize = 64;

/// Time a new connection gets to complete `Hello` + `UdpHello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Lines(Vec<String>),
    Quit,
}

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    sim: Simulation,
    sessions: SharedSessions,
    udp: Arc<UdpSocket>,
    local_addr: SocketAddr,
    report: MaterializeReport,
    tasks: Vec<JoinHandle<()>>,
}

impl GameServer {
    /// Binds TCP and UDP on `cfg.server_addr`, builds the world from `level`
    /// and starts accepting connections.
    ///
    /// When the address asks for port 0, UDP is bound to whichever port TCP
    /// received.
    ///
    /// Fails if the level has more bodies than one snapshot datagram can
    /// carry.
    pub async fn bind(cfg: EngineConfig, level: Level) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        let (sim, bodies) = Simulation::from_level(&level, cfg.physics);
        let snapshot_len = sim.world().len() * BYTES_PER_BODY;
        if snapshot_len > MAX_DATAGRAM_LEN {
            bail!(
                "level has {} bodies; a {snapshot_len}-byte snapshot exceeds the \
                 {MAX_DATAGRAM_LEN}-byte datagram limit",
                sim.world().len()
            );
        }

        let tcp = ReliableListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        let udp = UdpSocket::bind(local_addr).await.context("udp bind")?;

        let mut cfg = cfg;
        cfg.server_addr = local_addr.to_string();

        if bodies.players.is_empty() {
            warn!("Level has no player spawns; every connection will be rejected");
        }
        let table = SessionTable::new(
            bodies.players,
            sim.snapshot_indices(),
            Arc::clone(level.raw()),
        );
        let sessions: SharedSessions = Arc::new(Mutex::new(table));
        let udp = Arc::new(udp);

        let tasks = vec![
            tokio::spawn(accept_loop(tcp, Arc::clone(&sessions))),
            tokio::spawn(udp_input_loop(Arc::clone(&udp), Arc::clone(&sessions))),
        ];

        info!(
            %local_addr,
            bodies = sim.world().len(),
            slots = sessions.lock().capacity(),
            "Server bound"
        );

        Ok(Self {
            cfg,
            sim,
            sessions,
            udp,
            local_addr,
            report: bodies.report,
            tasks,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> SharedSessions {
        Arc::clone(&self.sessions)
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// What the level produced at startup.
    pub fn report(&self) -> &MaterializeReport {
        &self.report
    }

    fn interval(&self) -> time::Interval {
        let mut interval = time::interval(self.cfg.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let mut interval = self.interval();
        for _ in 0..ticks {
            interval.tick().await;
            self.tick_now().await;
        }
        Ok(())
    }

    /// Runs until `quit` arrives on the console channel or Ctrl-C.
    pub async fn run(&mut self, mut console: mpsc::Receiver<String>) -> anyhow::Result<()> {
        let mut interval = self.interval();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut console_open = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_now().await;
                }
                line = console.recv(), if console_open => match line {
                    Some(line) => match self.exec_console(&line) {
                        ConsoleReply::Lines(lines) => {
                            for l in lines {
                                println!("{l}");
                            }
                        }
                        ConsoleReply::Quit => break,
                    },
                    None => console_open = false,
                },
                res = &mut ctrl_c => {
                    res.context("listen for ctrl-c")?;
                    break;
                }
            }
        }
        info!(tick = self.sim.tick_count(), "Server shutting down");
        Ok(())
    }

    /// Runs one tick using the wall-clock delta since the previous one.
    pub async fn tick_now(&mut self) -> Bytes {
        let delta = self.sim.next_delta(Instant::now());
        self.step_once(delta).await
    }

    /// Runs one tick with an explicit delta and broadcasts the snapshot.
    pub async fn step_once(&mut self, delta: f32) -> Bytes {
        let inputs = self.sessions.lock().inputs();
        let snapshot = self.sim.tick(delta, &inputs);
        for event in self.sim.drain_zone_events() {
            info!(zone = event.zone.0, body = event.body.0, kind = ?event.kind, "Outcome zone reached");
        }
        self.broadcast(&snapshot).await;
        snapshot
    }

    async fn broadcast(&self, snapshot: &Bytes) {
        let targets = self.sessions.lock().broadcast_targets();
        for (session, addr) in targets {
            if let Err(e) = self.udp.send_to(snapshot, addr).await {
                debug!(session = session.0, %addr, error = %e, "Snapshot send failed");
            }
        }
    }

    /// Executes a console command.
    pub fn exec_console(&self, line: &str) -> ConsoleReply {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first().copied() {
            None => ConsoleReply::Lines(Vec::new()),
            Some("status") => ConsoleReply::Lines(self.status_lines()),
            Some("quit") | Some("exit") => ConsoleReply::Quit,
            Some(other) => ConsoleReply::Lines(vec![format!("Unknown command: {other}")]),
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        let state = match self.sim.state() {
            ClockState::Idle => "idle",
            ClockState::Running => "running",
        };
        out.push(format!("Clock: {state}, tick {}", self.sim.tick_count()));
        out.push(format!(
            "Bodies: {} ({} skipped at load)",
            self.sim.world().len(),
            self.report.skipped
        ));
        let sessions = self.sessions.lock();
        out.push(format!(
            "Sessions: {}/{} ({} free)",
            sessions.len(),
            sessions.capacity(),
            sessions.free_slots()
        ));
        for s in sessions.iter() {
            let udp = s
                .udp_peer
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push(format!(
                "  session {}: body={} udp={} keys={:?}",
                s.id.0, s.body.0, udp, s.keys
            ));
        }
        out
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn accept_loop(listener: ReliableListener, sessions: SharedSessions) {
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                debug!(%peer, "Incoming connection");
                tokio::spawn(handle_connection(conn, peer, Arc::clone(&sessions)));
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
}

async fn handle_connection(conn: ReliableConn, peer: SocketAddr, sessions: SharedSessions) {
    if let Err(e) = serve_connection(conn, peer, &sessions).await {
        debug!(%peer, error = %e, "Connection ended");
    }
}

async fn serve_connection(
    mut conn: ReliableConn,
    peer: SocketAddr,
    sessions: &SharedSessions,
) -> anyhow::Result<()> {
    let client_udp_port = time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut conn))
        .await
        .context("handshake timed out")??;
    let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let connected = sessions.lock().connect(tx, peer, Some(udp_peer));
    let connected = match connected {
        Ok(c) => c,
        Err(e) => {
            warn!(%peer, error = %e, "Rejecting connection");
            conn.send(&NetMsg::Rejected {
                reason: e.to_string(),
            })
            .await?;
            return Ok(());
        }
    };
    let id = connected.session_id;
    info!(session = id.0, body = connected.body.0, %udp_peer, "Client connected");

    let (mut reader, writer) = conn.into_split();
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let result = read_loop(&mut reader, id, sessions).await;

    // Dropping the session drops its sender, which ends the writer.
    sessions.lock().disconnect(id);
    if let Err(e) = writer_task.await {
        debug!(session = id.0, error = %e, "Writer task failed");
    }
    result
}

/// Runs `Hello` / `UdpHello` and returns the client's UDP port.
async fn handshake(conn: &mut ReliableConn) -> anyhow::Result<u16> {
    match conn.recv().await? {
        NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {}
        NetMsg::Hello { protocol } => {
            conn.send(&NetMsg::Rejected {
                reason: format!("protocol {protocol} not supported (server speaks {PROTOCOL_VERSION})"),
            })
            .await?;
            bail!("protocol mismatch: {protocol}");
        }
        other => bail!("expected Hello, got {other:?}"),
    }
    match conn.recv().await? {
        NetMsg::UdpHello { client_udp_port } => Ok(client_udp_port),
        other => bail!("expected UdpHello, got {other:?}"),
    }
}

async fn read_loop(
    reader: &mut FrameReader,
    id: SessionId,
    sessions: &SharedSessions,
) -> anyhow::Result<()> {
    loop {
        match reader.recv().await? {
            NetMsg::Input(input) => {
                if input.session_id != id {
                    warn!(session = id.0, claimed = input.session_id.0, "Input for another session");
                    continue;
                }
                let result = sessions.lock().apply_input(id, &input.keys, input.forward_xz);
                if let Err(e) = result {
                    debug!(session = id.0, error = %e, "Dropping invalid input");
                }
            }
            NetMsg::Ping { payload } => {
                sessions.lock().send_to(id, NetMsg::Pong { payload });
            }
            NetMsg::Disconnect { reason } => {
                info!(session = id.0, %reason, "Client disconnected");
                return Ok(());
            }
            other => debug!(session = id.0, ?other, "Ignoring control message"),
        }
    }
}

async fn write_loop(mut writer: FrameWriter, mut rx: mpsc::Receiver<NetMsg>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = writer.send(&msg).await {
            debug!(error = %e, "Control write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn udp_input_loop(udp: Arc<UdpSocket>, sessions: SharedSessions) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (n, from) = match udp.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "udp recv failed");
                continue;
            }
        };
        match decode_from_bytes(&buf[..n]) {
            Ok(NetMsg::Input(input)) => {
                let result = sessions.lock().apply_datagram_input(from, &input);
                if let Err(e) = result {
                    debug!(%from, session = input.session_id.0, error = %e, "Dropping input datagram");
                }
            }
            Ok(other) => debug!(%from, ?other, "Unexpected UDP message"),
            Err(e) => debug!(%from, error = %e, "Undecodable datagram"),
        }
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(tick_ms: u64, level: Level) -> anyhow::Result<GameServer> {
    let cfg = EngineConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_ms,
        ..Default::default()
    };
    GameServer::bind(cfg, level).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: &str = r#"{ "entities": [
        { "type": "Ballance$PlayerSpawn", "position": { "x": 0, "y": 1, "z": 0 } },
        { "type": "Ballance$WorldObject", "behaviour": "static",
          "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 10, "y": 0.5, "z": 10 } },
          "position": { "x": 0, "y": -0.5, "z": 0 } }
    ] }"#;

    async fn server() -> GameServer {
        bind_ephemeral(25, Level::from_json_str(LEVEL).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ephemeral_bind_reports_real_port() {
        let s = server().await;
        assert_ne!(s.local_addr().port(), 0);
        assert_eq!(s.cfg.server_addr, s.local_addr().to_string());
        assert_eq!(s.report().created, 2);
    }

    #[tokio::test]
    async fn level_too_large_for_one_datagram_is_refused() {
        let crate_box = serde_json::json!({
            "type": "Ballance$WorldObject", "behaviour": "static",
            "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 0.5, "y": 0.5, "z": 0.5 } },
            "position": { "x": 0, "y": 0, "z": 0 }
        });
        let max_bodies = MAX_DATAGRAM_LEN / BYTES_PER_BODY;

        let fits = serde_json::json!({ "entities": vec![crate_box.clone(); max_bodies] });
        assert!(bind_ephemeral(25, Level::from_value(fits).unwrap()).await.is_ok());

        let too_many = serde_json::json!({ "entities": vec![crate_box; max_bodies + 1] });
        let err = match bind_ephemeral(25, Level::from_value(too_many).unwrap()).await {
            Ok(_) => panic!("oversized level must be refused"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("datagram limit"), "{err:#}");
    }

    #[tokio::test]
    async fn step_once_returns_snapshot_of_all_bodies() {
        let mut s = server().await;
        let snap = s.step_once(0.0).await;
        assert_eq!(snap.len(), 2 * ballance_shared::snapshot::BYTES_PER_BODY);
        assert_eq!(s.simulation().state(), ClockState::Running);
    }

    #[tokio::test]
    async fn console_status_and_quit() {
        let mut s = server().await;
        match s.exec_console("status") {
            ConsoleReply::Lines(lines) => {
                assert!(lines.iter().any(|l| l.starts_with("Sessions: 0/1")));
            }
            ConsoleReply::Quit => panic!("status must not quit"),
        }
        assert_eq!(s.exec_console("  quit "), ConsoleReply::Quit);
        assert_eq!(s.exec_console(""), ConsoleReply::Lines(Vec::new()));
    }

    #[tokio::test]
    async fn run_for_ticks_advances_clock() {
        let mut s = server().await;
        s.run_for_ticks(3).await.unwrap();
        assert_eq!(s.simulation().tick_count(), 3);
    }
}
