//! Simulation clock.
//!
//! One tick, in order:
//! 1. delta since the previous tick (zero on the first tick, clamped above)
//! 2. ledger forces as impulses
//! 3. session movement forces as impulses
//! 4. physics step, contact events fed into the ledger
//! 5. snapshot encoded once
//!
//! The world and the ledger are owned here; session input is passed in.

use std::collections::BTreeMap;
use std::time::Instant;

use ballance_shared::{
    level::Level,
    math::Vec3,
    net::BodyId,
    physics::PhysicsConfig,
    snapshot,
};
use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    ledger::ForceLedger,
    materialize::{materialize_level, LevelBodies, OutcomeKind},
    session::{movement_force, PlayerInput},
    world::{ContactEvent, PhysicsWorld},
};

/// Clock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// No tick has run yet.
    Idle,
    Running,
}

/// A body touched a win or death zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneEvent {
    pub zone: BodyId,
    pub kind: OutcomeKind,
    pub body: BodyId,
}

/// The authoritative simulation.
#[derive(Debug)]
pub struct Simulation {
    world: PhysicsWorld,
    ledger: ForceLedger,
    outcome_zones: BTreeMap<BodyId, OutcomeKind>,
    zone_events: Vec<ZoneEvent>,
    cfg: PhysicsConfig,
    state: ClockState,
    last_tick: Option<Instant>,
    tick: u64,
}

impl Simulation {
    /// Builds the world from a level. Returns the simulation and what the
    /// materializer produced (player pool, report).
    pub fn from_level(level: &Level, cfg: PhysicsConfig) -> (Self, LevelBodies) {
        let mut world = PhysicsWorld::new(&cfg);
        let mut ledger = ForceLedger::new();
        let bodies = materialize_level(level, &mut world, &mut ledger, &cfg);
        let sim = Self {
            world,
            ledger,
            outcome_zones: bodies.outcome_zones.clone(),
            zone_events: Vec::new(),
            cfg,
            state: ClockState::Idle,
            last_tick: None,
            tick: 0,
        };
        (sim, bodies)
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn ledger(&self) -> &ForceLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ForceLedger {
        &mut self.ledger
    }

    /// Snapshot position of every body, for `StartGame`.
    pub fn snapshot_indices(&self) -> BTreeMap<BodyId, u32> {
        self.world
            .ids()
            .enumerate()
            .map(|(i, id)| (id, i as u32))
            .collect()
    }

    /// Wall-clock delta for the tick starting at `now`, in seconds.
    pub fn next_delta(&mut self, now: Instant) -> f32 {
        let delta = match self.last_tick {
            None => 0.0,
            Some(prev) => now.saturating_duration_since(prev).as_secs_f32(),
        };
        self.last_tick = Some(now);
        delta.min(self.cfg.max_tick_delta)
    }

    /// Runs one tick with an explicit delta and returns the encoded snapshot.
    pub fn tick(&mut self, delta: f32, inputs: &[PlayerInput]) -> Bytes {
        self.state = ClockState::Running;
        let delta = if delta.is_finite() {
            delta.clamp(0.0, self.cfg.max_tick_delta)
        } else {
            0.0
        };

        let zone_impulses: Vec<_> = self
            .ledger
            .affected_bodies()
            .map(|body| (body, self.ledger.net_force(body) * delta))
            .collect();
        for (body, impulse) in zone_impulses {
            self.world.apply_impulse(body, impulse);
        }

        for input in inputs {
            let force = movement_force(input.heading, input.keys, self.cfg.move_force);
            if force != Vec3::ZERO {
                self.world.apply_impulse(input.body, force * delta);
            }
        }

        let events = self.world.step(delta);
        self.apply_contacts(&events);

        self.tick += 1;
        trace!(tick = self.tick, delta, bodies = self.world.len(), "Tick");
        snapshot::encode(&self.world.states())
    }

    fn apply_contacts(&mut self, events: &[ContactEvent]) {
        for event in events {
            match *event {
                ContactEvent::Began(a, b) => {
                    self.ledger.on_contact_begin(a, b);
                    self.record_outcome(a, b);
                    self.record_outcome(b, a);
                }
                ContactEvent::Ended(a, b) => self.ledger.on_contact_end(a, b),
            }
        }
    }

    fn record_outcome(&mut self, zone: BodyId, body: BodyId) {
        if let Some(&kind) = self.outcome_zones.get(&zone) {
            debug!(zone = zone.0, body = body.0, ?kind, "Outcome zone entered");
            self.zone_events.push(ZoneEvent { zone, kind, body });
        }
    }

    /// Outcome-zone contacts since the last call.
    pub fn drain_zone_events(&mut self) -> Vec<ZoneEvent> {
        std::mem::take(&mut self.zone_events)
    }
}
