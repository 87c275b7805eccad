//! Networking primitives.
//!
//! Goals:
//! - Provide a simple reliable (TCP) and unreliable (UDP) channel.
//! - Provide the control messages exchanged by client/server.
//! - Keep serialization explicit and versionable.
//!
//! Control messages are JSON frames on TCP, length-prefixed with a big-endian
//! `u32`. Input may also travel as a JSON datagram. World state travels as a
//! raw snapshot datagram (see [`crate::snapshot`]), never as JSON.

use std::net::SocketAddr;

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    time,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted control frame.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Largest UDP payload we send or expect.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Identifies a connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

/// Opaque, engine-assigned body handle. Stable for the body's lifetime only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    Welcome {
        session_id: SessionId,
        physics_body_id: BodyId,
    },
    /// Server is full; the connection is closed after this.
    Rejected {
        reason: String,
    },

    // ─── Game flow ───
    /// Sent once per session when the last player slot is taken.
    StartGame(StartGame),
    /// Client -> server: held keys and camera heading.
    Input(InputMsg),

    // ─── Liveness ───
    Ping {
        payload: serde_json::Value,
    },
    Pong {
        payload: serde_json::Value,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Payload of the `start-game` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartGame {
    /// The level document, unchanged from the server's file.
    pub level: serde_json::Value,
    pub physics_body_id: BodyId,
    /// Position of the player's record inside each world-state snapshot.
    pub snapshot_index: u32,
}

/// Payload of the `input` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMsg {
    pub session_id: SessionId,
    /// Tokens drawn from `"w"`, `"a"`, `"s"`, `"d"`.
    pub keys: Vec<String>,
    /// Camera forward projected on the XZ plane.
    #[serde(rename = "forwardXZ")]
    pub forward_xz: [f32; 2],
}

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed JSON frame.
pub async fn read_frame<R>(r: &mut R) -> anyhow::Result<NetMsg>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned reader and writer halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { half: r }, FrameWriter { half: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }

    /// Flushes and shuts down the write direction.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.half.shutdown().await.context("tcp shutdown")?;
        Ok(())
    }
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize udp msg")?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    /// Receives one raw datagram within the given timeout.
    pub async fn recv_raw_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<Bytes>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_uses_wire_field_names() {
        let msg = NetMsg::Input(InputMsg {
            session_id: SessionId(3),
            keys: vec!["w".into(), "a".into()],
            forward_xz: [1.0, 0.0],
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Input"]["forwardXZ"], serde_json::json!([1.0, 0.0]));
        assert_eq!(decode_from_bytes(&encode_to_bytes(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn start_game_uses_wire_field_names() {
        let msg = StartGame {
            level: serde_json::json!({ "entities": [] }),
            physics_body_id: BodyId(7),
            snapshot_index: 2,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["physicsBodyId"], 7);
        assert_eq!(json["snapshotIndex"], 2);
    }

    #[test]
    fn non_finite_heading_does_not_decode() {
        let raw = br#"{"Input":{"session_id":1,"keys":[],"forwardXZ":[null,1.0]}}"#;
        assert!(decode_from_bytes(raw).is_err());
    }

    #[tokio::test]
    async fn frames_roundtrip_over_a_duplex_pipe() -> anyhow::Result<()> {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = NetMsg::Ping {
            payload: serde_json::json!({ "t": 42, "tag": "opaque" }),
        };
        write_frame(&mut a, &msg).await?;
        assert_eq!(read_frame(&mut b).await?, msg);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
