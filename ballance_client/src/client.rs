//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake, `StartGame`, ping, disconnect)
//! - An unreliable datagram socket (input out, world-state snapshots in)
//! - A world mirror built from the level in `StartGame`
//!
//! Control frames are read by a background task and handed over through a
//! channel, so polling with a timeout never cuts a frame in half.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context};
use ballance_shared::{
    config::EngineConfig,
    input::MoveKeys,
    net::{
        BodyId, FrameReader, FrameWriter, NetMsg, ReliableConn, SessionId, StartGame,
        UnreliableConn, PROTOCOL_VERSION,
    },
    snapshot::{self, BodyState},
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::{
    input::{build_input, InputState},
    mirror::WorldMirror,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Welcomed, waiting for the remaining player slots to fill.
    Waiting,
    /// `StartGame` received, mirror built.
    Playing,
    Disconnected,
}

/// Result of a console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Lines(Vec<String>),
    Quit,
}

/// High-level game client.
pub struct GameClient {
    pub session_id: SessionId,
    pub body: BodyId,
    pub state: ClientState,
    pub input: InputState,

    writer: FrameWriter,
    inbound: mpsc::Receiver<NetMsg>,
    reader_task: JoinHandle<()>,
    pub unreliable: UnreliableConn,
    server_peer: SocketAddr,

    pub start: Option<StartGame>,
    pub mirror: Option<WorldMirror>,
    pub last_pong: Option<serde_json::Value>,
    /// World-state datagrams that failed to decode and were discarded.
    pub decode_errors: u64,
}

impl GameClient {
    /// Connects to a server and performs the handshake.
    ///
    /// A `Rejected` reply (server full, protocol mismatch) is an error.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so we can tell the server where to send snapshots.
        let bind_ip = match server_addr.ip() {
            IpAddr::V4(ip) if ip.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let unreliable = UnreliableConn::connect(SocketAddr::new(bind_ip, 0), server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let (session_id, body) = match reliable.recv().await? {
            NetMsg::Welcome {
                session_id,
                physics_body_id,
            } => (session_id, physics_body_id),
            NetMsg::Rejected { reason } => bail!("rejected by server: {reason}"),
            other => bail!("expected Welcome, got {other:?}"),
        };

        info!(session = session_id.0, body = body.0, "Connected to server");

        let server_peer = reliable.peer_addr()?;
        let (reader, writer) = reliable.into_split();
        let (tx, inbound) = mpsc::channel(32);
        let reader_task = tokio::spawn(read_loop(reader, tx));

        Ok(Self {
            session_id,
            body,
            state: ClientState::Waiting,
            input: InputState::default(),
            writer,
            inbound,
            reader_task,
            unreliable,
            server_peer,
            start: None,
            mirror: None,
            last_pong: None,
            decode_errors: 0,
        })
    }

    /// Handles at most one control message, waiting up to `timeout`.
    ///
    /// Returns whether a message was handled.
    pub async fn poll_reliable(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        match time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(msg)) => {
                self.handle_reliable_message(msg)?;
                Ok(true)
            }
            Ok(None) => {
                if self.state != ClientState::Disconnected {
                    warn!("Control connection closed");
                    self.state = ClientState::Disconnected;
                }
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }

    fn handle_reliable_message(&mut self, msg: NetMsg) -> anyhow::Result<()> {
        match msg {
            NetMsg::StartGame(start) => {
                let mirror = WorldMirror::from_start(&start).context("build world mirror")?;
                info!(
                    body = start.physics_body_id.0,
                    snapshot_index = start.snapshot_index,
                    bodies = mirror.len(),
                    "Game started"
                );
                self.body = start.physics_body_id;
                self.mirror = Some(mirror);
                self.start = Some(start);
                self.state = ClientState::Playing;
            }
            NetMsg::Pong { payload } => {
                debug!(%payload, "Pong");
                self.last_pong = Some(payload);
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected by server");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unhandled reliable message");
            }
        }
        Ok(())
    }

    /// Waits for one world-state datagram and applies it to the mirror.
    ///
    /// A malformed datagram is logged and discarded; it is not an error.
    pub async fn recv_world_state(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<Vec<BodyState>>> {
        let Some(raw) = self.unreliable.recv_raw_timeout(timeout).await? else {
            return Ok(None);
        };
        match snapshot::decode(&raw) {
            Ok(states) => {
                if let Some(mirror) = self.mirror.as_mut() {
                    mirror.apply(&states);
                }
                Ok(Some(states))
            }
            Err(e) => {
                self.decode_errors += 1;
                warn!(len = raw.len(), error = %e, "Discarding malformed world state");
                Ok(None)
            }
        }
    }

    /// Sends the current input state as a datagram.
    pub async fn send_input(&mut self) -> anyhow::Result<()> {
        let msg = NetMsg::Input(build_input(self.session_id, self.input));
        self.unreliable.send(&msg).await
    }

    /// Sends the current input state over the control stream.
    pub async fn send_input_reliable(&mut self) -> anyhow::Result<()> {
        let msg = NetMsg::Input(build_input(self.session_id, self.input));
        self.writer.send(&msg).await
    }

    /// Sends a ping; the server echoes `payload` back in a `Pong`.
    pub async fn ping(&mut self, payload: serde_json::Value) -> anyhow::Result<()> {
        self.writer.send(&NetMsg::Ping { payload }).await
    }

    /// Announces the disconnect and closes the control stream.
    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        self.writer
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await?;
        self.writer.shutdown().await?;
        self.state = ClientState::Disconnected;
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<ConsoleReply> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return Ok(ConsoleReply::Lines(Vec::new()));
        };

        let reply = match cmd {
            "keys" => match MoveKeys::from_tokens(&tokens[1..]) {
                Ok(keys) => {
                    self.input.keys = keys;
                    vec![format!("Holding {:?}", keys.to_tokens())]
                }
                Err(e) => vec![format!("Bad keys: {e}")],
            },
            "yaw" => match tokens.get(1).and_then(|t| t.parse::<f32>().ok()) {
                Some(yaw) if yaw.is_finite() => {
                    self.input.camera_yaw = yaw;
                    vec![format!("Camera yaw {yaw}")]
                }
                _ => vec!["Usage: yaw <radians>".to_string()],
            },
            "ping" => {
                self.ping(serde_json::json!({ "console": true })).await?;
                Vec::new()
            }
            "status" => {
                let mut out = Vec::new();
                out.push(format!("State: {:?}", self.state));
                out.push(format!("Session: {} body: {}", self.session_id.0, self.body.0));
                out.push(format!("Server: {}", self.server_peer));
                if let Some(own) = self.mirror.as_ref().and_then(|m| m.own()) {
                    let p = own.state.position;
                    out.push(format!("Position: {:.2} {:.2} {:.2}", p.x, p.y, p.z));
                }
                if let Some(m) = &self.mirror {
                    out.push(format!("Snapshots applied: {}", m.updates()));
                }
                out.push(format!("Discarded datagrams: {}", self.decode_errors));
                out
            }
            "quit" | "exit" => return Ok(ConsoleReply::Quit),
            other => vec![format!("Unknown command: {other}")],
        };
        Ok(ConsoleReply::Lines(reply))
    }

    /// Returns the control connection's peer.
    pub fn server_peer(&self) -> SocketAddr {
        self.server_peer
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(mut reader: FrameReader, tx: mpsc::Sender<NetMsg>) {
    loop {
        match reader.recv().await {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Control stream ended");
                return;
            }
        }
    }
}
