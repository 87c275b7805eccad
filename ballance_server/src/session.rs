//! Session manager.
//!
//! Owns the pool of unclaimed player bodies and the table of connected
//! sessions. Network tasks only write the stored input fields; the tick reads
//! them through [`SessionTable::inputs`].

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ballance_shared::{
    error::{CapacityError, InvalidInputError},
    input::MoveKeys,
    math::Vec3,
    net::{BodyId, InputMsg, NetMsg, SessionId, StartGame},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-connection state.
#[derive(Debug)]
pub struct ClientSession {
    pub id: SessionId,
    pub body: BodyId,
    /// Unit XZ heading; zero until the first valid input.
    pub heading: Vec3,
    pub keys: MoveKeys,
    pub udp_peer: Option<SocketAddr>,
    peer_ip: IpAddr,
    outbound: mpsc::Sender<NetMsg>,
}

/// Input snapshot handed to the tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerInput {
    pub body: BodyId,
    pub heading: Vec3,
    pub keys: MoveKeys,
}

/// Result of a successful `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub session_id: SessionId,
    pub body: BodyId,
    /// This connection took the last free slot and started the game.
    pub game_started: bool,
}

/// Connected sessions plus the unassigned-body pool.
#[derive(Debug)]
pub struct SessionTable {
    next_id: u32,
    capacity: usize,
    pool: Vec<BodyId>,
    sessions: BTreeMap<SessionId, ClientSession>,
    snapshot_indices: BTreeMap<BodyId, u32>,
    level: Arc<serde_json::Value>,
}

impl SessionTable {
    /// `pool` holds the player bodies in spawn order; the last one is handed
    /// out first.
    pub fn new(
        pool: Vec<BodyId>,
        snapshot_indices: BTreeMap<BodyId, u32>,
        level: Arc<serde_json::Value>,
    ) -> Self {
        Self {
            next_id: 1,
            capacity: pool.len(),
            pool,
            sessions: BTreeMap::new(),
            snapshot_indices,
            level,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_slots(&self) -> usize {
        self.pool.len()
    }

    pub fn get(&self, id: SessionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    /// Claims a player body for a new connection.
    ///
    /// `Welcome` is queued on `outbound` before anything else. When this call
    /// empties the pool, every session gets its `StartGame` exactly once.
    pub fn connect(
        &mut self,
        outbound: mpsc::Sender<NetMsg>,
        peer: SocketAddr,
        udp_peer: Option<SocketAddr>,
    ) -> Result<Connected, CapacityError> {
        let Some(body) = self.pool.pop() else {
            return Err(CapacityError {
                capacity: self.capacity,
            });
        };
        let id = SessionId(self.next_id);
        self.next_id += 1;

        let session = ClientSession {
            id,
            body,
            heading: Vec3::ZERO,
            keys: MoveKeys::empty(),
            udp_peer,
            peer_ip: peer.ip(),
            outbound,
        };
        session.send(NetMsg::Welcome {
            session_id: id,
            physics_body_id: body,
        });
        self.sessions.insert(id, session);
        info!(session = id.0, body = body.0, %peer, free = self.pool.len(), "Assigned player body");

        let game_started = self.pool.is_empty();
        if game_started {
            self.broadcast_start();
        }
        Ok(Connected {
            session_id: id,
            body,
            game_started,
        })
    }

    fn broadcast_start(&self) {
        info!(sessions = self.sessions.len(), "All player slots taken, starting game");
        for session in self.sessions.values() {
            let snapshot_index = self
                .snapshot_indices
                .get(&session.body)
                .copied()
                .unwrap_or_default();
            session.send(NetMsg::StartGame(StartGame {
                level: (*self.level).clone(),
                physics_body_id: session.body,
                snapshot_index,
            }));
        }
    }

    /// Removes a session. Its body stays in the world and is not returned to
    /// the pool.
    pub fn disconnect(&mut self, id: SessionId) -> Option<BodyId> {
        let session = self.sessions.remove(&id)?;
        info!(session = id.0, body = session.body.0, "Session closed");
        Some(session.body)
    }

    /// Validates and stores input. On error the previous input is kept.
    pub fn apply_input<S: AsRef<str>>(
        &mut self,
        id: SessionId,
        keys: &[S],
        heading_xz: [f32; 2],
    ) -> Result<(), InvalidInputError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(InvalidInputError::UnknownSession)?;
        let parsed = MoveKeys::from_tokens(keys)?;
        let heading = Vec3::heading_xz(heading_xz[0], heading_xz[1])
            .ok_or(InvalidInputError::Heading(heading_xz[0], heading_xz[1]))?;
        session.keys = parsed;
        session.heading = heading;
        Ok(())
    }

    /// Applies input that arrived as a datagram.
    ///
    /// The sender must come from the same host as the session's control
    /// connection; its address becomes the session's snapshot destination.
    pub fn apply_datagram_input(
        &mut self,
        from: SocketAddr,
        msg: &InputMsg,
    ) -> Result<(), InvalidInputError> {
        let session = self
            .sessions
            .get_mut(&msg.session_id)
            .ok_or(InvalidInputError::UnknownSession)?;
        if session.peer_ip != from.ip() {
            return Err(InvalidInputError::NotOwner);
        }
        session.udp_peer = Some(from);
        self.apply_input(msg.session_id, &msg.keys, msg.forward_xz)
    }

    /// Copies every session's stored input, in session order.
    pub fn inputs(&self) -> Vec<PlayerInput> {
        self.sessions
            .values()
            .map(|s| PlayerInput {
                body: s.body,
                heading: s.heading,
                keys: s.keys,
            })
            .collect()
    }

    /// Snapshot destinations of all sessions that announced one.
    pub fn broadcast_targets(&self) -> Vec<(SessionId, SocketAddr)> {
        self.sessions
            .values()
            .filter_map(|s| s.udp_peer.map(|addr| (s.id, addr)))
            .collect()
    }

    /// Queues a control message for one session.
    pub fn send_to(&self, id: SessionId, msg: NetMsg) -> bool {
        match self.sessions.get(&id) {
            Some(session) => session.send(msg),
            None => false,
        }
    }
}

impl ClientSession {
    fn send(&self, msg: NetMsg) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = self.id.0, "Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = self.id.0, "Outbound queue closed");
                false
            }
        }
    }
}

/// Movement force for one session, before scaling by the tick delta.
///
/// Forward/back follow the heading, left/right follow its perpendicular in
/// the horizontal plane. No held keys gives zero regardless of heading.
pub fn movement_force(heading: Vec3, keys: MoveKeys, move_force: f32) -> Vec3 {
    let forward = Vec3::new(heading.x, 0.0, heading.z) * move_force;
    let left = forward.perp_xz();
    let mut force = Vec3::ZERO;
    if keys.contains(MoveKeys::FORWARD) {
        force += forward;
    }
    if keys.contains(MoveKeys::BACK) {
        force += -forward;
    }
    if keys.contains(MoveKeys::LEFT) {
        force += left;
    }
    if keys.contains(MoveKeys::RIGHT) {
        force += -left;
    }
    force
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn table(spawns: u32) -> SessionTable {
        let pool: Vec<_> = (0..spawns).map(|i| BodyId(i * 2)).collect();
        let indices = pool.iter().enumerate().map(|(i, b)| (*b, i as u32)).collect();
        SessionTable::new(
            pool,
            indices,
            Arc::new(serde_json::json!({ "entities": [] })),
        )
    }

    fn channel() -> (mpsc::Sender<NetMsg>, mpsc::Receiver<NetMsg>) {
        mpsc::channel(16)
    }

    #[test]
    fn k_spawns_admit_exactly_k_distinct_sessions() {
        let mut t = table(3);
        let mut bodies = Vec::new();
        let mut rxs = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = channel();
            rxs.push(rx);
            bodies.push(t.connect(tx, peer(), None).unwrap().body);
        }
        bodies.sort();
        bodies.dedup();
        assert_eq!(bodies.len(), 3);

        let (tx, _rx) = channel();
        assert_eq!(
            t.connect(tx, peer(), None),
            Err(CapacityError { capacity: 3 })
        );
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn last_spawn_is_assigned_first() {
        let mut t = table(2);
        let (tx, _rx) = channel();
        assert_eq!(t.connect(tx, peer(), None).unwrap().body, BodyId(2));
    }

    #[test]
    fn start_game_is_sent_once_when_pool_empties() {
        let mut t = table(2);
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let first = t.connect(tx1, peer(), None).unwrap();
        assert!(!first.game_started);
        let second = t.connect(tx2, peer(), None).unwrap();
        assert!(second.game_started);

        for (rx, own) in [(&mut rx1, first), (&mut rx2, second)] {
            assert!(matches!(rx.try_recv(), Ok(NetMsg::Welcome { .. })));
            match rx.try_recv() {
                Ok(NetMsg::StartGame(start)) => {
                    assert_eq!(start.physics_body_id, own.body);
                    assert_eq!(start.level, serde_json::json!({ "entities": [] }));
                }
                other => panic!("expected StartGame, got {other:?}"),
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn disconnect_does_not_refill_pool() {
        let mut t = table(1);
        let (tx, _rx) = channel();
        let c = t.connect(tx, peer(), None).unwrap();
        assert_eq!(t.disconnect(c.session_id), Some(c.body));
        assert_eq!(t.disconnect(c.session_id), None);
        let (tx, _rx) = channel();
        assert!(t.connect(tx, peer(), None).is_err());
    }

    #[test]
    fn invalid_input_keeps_previous_state() {
        let mut t = table(1);
        let (tx, _rx) = channel();
        let id = t.connect(tx, peer(), None).unwrap().session_id;
        t.apply_input(id, &["w"], [0.0, 2.0]).unwrap();

        assert!(matches!(
            t.apply_input(id, &["s"], [f32::NAN, 1.0]),
            Err(InvalidInputError::Heading(..))
        ));
        assert!(matches!(
            t.apply_input(id, &["jump"], [1.0, 0.0]),
            Err(InvalidInputError::UnknownKey(_))
        ));
        let s = t.get(id).unwrap();
        assert_eq!(s.keys, MoveKeys::FORWARD);
        assert_eq!(s.heading, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn zero_heading_still_updates_keys() {
        let mut t = table(1);
        let (tx, _rx) = channel();
        let id = t.connect(tx, peer(), None).unwrap().session_id;
        t.apply_input(id, &["w"], [1.0, 0.0]).unwrap();

        let none: [&str; 0] = [];
        t.apply_input(id, &none, [0.0, 0.0]).unwrap();
        let s = t.get(id).unwrap();
        assert_eq!(s.keys, MoveKeys::empty());
        assert_eq!(s.heading, Vec3::ZERO);
        assert_eq!(movement_force(s.heading, s.keys, 500.0), Vec3::ZERO);
    }

    #[test]
    fn datagram_input_must_come_from_session_host() {
        let mut t = table(1);
        let (tx, _rx) = channel();
        let id = t.connect(tx, peer(), None).unwrap().session_id;
        let msg = InputMsg {
            session_id: id,
            keys: vec!["d".into()],
            forward_xz: [1.0, 0.0],
        };
        let stranger: SocketAddr = "10.0.0.9:7000".parse().unwrap();
        assert_eq!(
            t.apply_datagram_input(stranger, &msg),
            Err(InvalidInputError::NotOwner)
        );
        let own: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        t.apply_datagram_input(own, &msg).unwrap();
        assert_eq!(t.broadcast_targets(), vec![(id, own)]);
        assert_eq!(t.get(id).unwrap().keys, MoveKeys::RIGHT);
    }

    #[test]
    fn no_keys_means_no_force() {
        let heading = Vec3::new(0.6, 0.0, 0.8);
        assert_eq!(movement_force(heading, MoveKeys::empty(), 500.0), Vec3::ZERO);
    }

    #[test]
    fn keys_map_to_heading_and_perpendicular() {
        let heading = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(
            movement_force(heading, MoveKeys::FORWARD, 500.0),
            Vec3::new(500.0, 0.0, 0.0)
        );
        assert_eq!(
            movement_force(heading, MoveKeys::BACK, 500.0),
            Vec3::new(-500.0, 0.0, 0.0)
        );
        assert_eq!(
            movement_force(heading, MoveKeys::LEFT, 500.0),
            Vec3::new(0.0, 0.0, -500.0)
        );
        assert_eq!(
            movement_force(heading, MoveKeys::RIGHT, 500.0),
            Vec3::new(0.0, 0.0, 500.0)
        );
        assert_eq!(
            movement_force(heading, MoveKeys::FORWARD | MoveKeys::BACK, 500.0),
            Vec3::ZERO
        );
    }
}
