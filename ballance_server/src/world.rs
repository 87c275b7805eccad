//! Physics world backed by `rapier3d`.
//!
//! Wraps the Rapier sets and pipeline behind a small API keyed by [`BodyId`].
//! Body ids come from the engine's own handles and are treated as opaque.
//!
//! Snapshot order is ascending `BodyId`. Rapier hands out arena indices in
//! insertion order and nothing is ever removed here, so this is also the
//! order in which bodies were created.

use std::collections::BTreeMap;
use std::fmt;

use ballance_shared::{
    math::{Quat, Vec3},
    net::BodyId,
    physics::PhysicsConfig,
    snapshot::BodyState,
};
use parking_lot::Mutex;
use std::sync::mpsc::{channel as unbounded, Receiver};
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude::*;
use tracing::warn;

/// Contact transition between two bodies, reported after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactEvent {
    Began(BodyId, BodyId),
    Ended(BodyId, BodyId),
}

/// Pose and motion type of a body to insert.
#[derive(Debug, Clone, Copy)]
pub struct BodySpec {
    pub position: Vec3,
    pub orientation: Quat,
    /// Zero means fixed.
    pub mass: f32,
    pub is_trigger: bool,
}

struct BodyEntry {
    handle: RigidBodyHandle,
    /// Last pose known to be finite, restored if a step goes bad.
    last_good: (Vec3, Quat),
}

/// Rapier state needed to step a dynamic world.
pub struct PhysicsWorld {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector<Real>,
    max_linear_speed: f32,
    entries: BTreeMap<BodyId, BodyEntry>,
    collision_recv: Mutex<Receiver<CollisionEvent>>,
    contact_force_recv: Mutex<Receiver<ContactForceEvent>>,
    event_collector: ChannelEventCollector,
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("bodies", &self.entries.len())
            .field("colliders", &self.colliders.len())
            .field("gravity", &self.gravity)
            .finish_non_exhaustive()
    }
}

fn to_na_vec(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn from_na_vec(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_na_quat(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_na_quat(q: &UnitQuaternion<Real>) -> Quat {
    Quat::new(q.i, q.j, q.k, q.w)
}

impl PhysicsWorld {
    pub fn new(cfg: &PhysicsConfig) -> Self {
        let (collision_send, collision_recv) = unbounded();
        let (contact_force_send, contact_force_recv) = unbounded();
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: to_na_vec(cfg.gravity),
            max_linear_speed: cfg.max_linear_speed,
            entries: BTreeMap::new(),
            collision_recv: Mutex::new(collision_recv),
            contact_force_recv: Mutex::new(contact_force_recv),
            event_collector: ChannelEventCollector::new(collision_send, contact_force_send),
        }
    }

    /// Inserts a body with one attached collider and returns its id.
    pub fn insert(&mut self, spec: BodySpec, collider: ColliderBuilder) -> BodyId {
        let builder = if spec.mass > 0.0 && !spec.is_trigger {
            RigidBodyBuilder::dynamic()
        } else {
            RigidBodyBuilder::fixed()
        };
        let rb = builder
            .translation(to_na_vec(spec.position))
            .build();
        let handle = self.bodies.insert(rb);
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_rotation(to_na_quat(spec.orientation), false);
        }

        let mut collider = collider;
        if spec.is_trigger {
            collider = collider
                .sensor(true)
                .active_events(ActiveEvents::COLLISION_EVENTS);
        } else if spec.mass > 0.0 {
            collider = collider.mass(spec.mass);
        }
        self.colliders
            .insert_with_parent(collider.build(), handle, &mut self.bodies);

        let (index, _generation) = handle.into_raw_parts();
        let id = BodyId(index);
        self.entries.insert(
            id,
            BodyEntry {
                handle,
                last_good: (spec.position, spec.orientation),
            },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Body ids in snapshot order.
    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.entries.keys().copied()
    }

    /// Position of a body inside each snapshot.
    pub fn snapshot_index(&self, id: BodyId) -> Option<u32> {
        if !self.entries.contains_key(&id) {
            return None;
        }
        u32::try_from(self.entries.range(..id).count()).ok()
    }

    /// Applies an instantaneous impulse. Ignored for unknown or non-dynamic bodies.
    pub fn apply_impulse(&mut self, id: BodyId, impulse: Vec3) {
        if !impulse.is_finite() {
            warn!(body = id.0, ?impulse, "Dropping non-finite impulse");
            return;
        }
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if let Some(body) = self.bodies.get_mut(entry.handle) {
            if body.is_dynamic() {
                body.apply_impulse(to_na_vec(impulse), true);
            }
        }
    }

    /// Mass of a body; zero for fixed bodies and unknown ids.
    pub fn mass(&self, id: BodyId) -> f32 {
        self.entries
            .get(&id)
            .and_then(|e| self.bodies.get(e.handle))
            .filter(|b| b.is_dynamic())
            .map(|b| b.mass())
            .unwrap_or(0.0)
    }

    pub fn state(&self, id: BodyId) -> Option<BodyState> {
        let entry = self.entries.get(&id)?;
        self.bodies.get(entry.handle).map(body_state)
    }

    /// All body states in snapshot order.
    pub fn states(&self) -> Vec<BodyState> {
        self.entries
            .values()
            .filter_map(|e| self.bodies.get(e.handle))
            .map(body_state)
            .collect()
    }

    /// Advances the world by `dt` seconds and returns contact transitions.
    ///
    /// A zero `dt` leaves the world untouched and only drains pending events.
    pub fn step(&mut self, dt: f32) -> Vec<ContactEvent> {
        if dt > 0.0 && dt.is_finite() {
            self.integration_parameters.dt = dt;
            self.pipeline.step(
                &self.gravity,
                &self.integration_parameters,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                &(),
                &self.event_collector,
            );
            self.sanitize();
        }
        // Force events are not used; keep the channel from growing.
        while self.contact_force_recv.get_mut().try_recv().is_ok() {}
        self.drain_contacts()
    }

    fn drain_contacts(&mut self) -> Vec<ContactEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.collision_recv.get_mut().try_recv() {
            let (h1, h2) = (event.collider1(), event.collider2());
            let (Some(a), Some(b)) = (self.collider_body(h1), self.collider_body(h2)) else {
                continue;
            };
            out.push(if event.started() {
                ContactEvent::Began(a, b)
            } else {
                ContactEvent::Ended(a, b)
            });
        }
        out
    }

    fn collider_body(&self, handle: ColliderHandle) -> Option<BodyId> {
        let parent = self.colliders.get(handle)?.parent()?;
        let (index, _) = parent.into_raw_parts();
        Some(BodyId(index))
    }

    /// Restores bodies whose state went non-finite and bounds linear speed.
    fn sanitize(&mut self) {
        for (id, entry) in self.entries.iter_mut() {
            let Some(body) = self.bodies.get_mut(entry.handle) else {
                continue;
            };
            if !body.is_dynamic() {
                continue;
            }
            let state = body_state(body);
            let finite = state.position.is_finite()
                && state.orientation.is_finite()
                && state.linear_velocity.is_finite()
                && state.angular_velocity.is_finite();
            if !finite {
                warn!(body = id.0, "Non-finite body state, restoring last good pose");
                let (pos, rot) = entry.last_good;
                body.set_translation(to_na_vec(pos), true);
                body.set_rotation(to_na_quat(rot), true);
                body.set_linvel(Vector::zeros(), true);
                body.set_angvel(Vector::zeros(), true);
                continue;
            }
            entry.last_good = (state.position, state.orientation);
            let speed = state.linear_velocity.len();
            if speed > self.max_linear_speed {
                let clamped = state.linear_velocity.clamp_len(self.max_linear_speed);
                body.set_linvel(to_na_vec(clamped), true);
            }
        }
    }
}

fn body_state(body: &RigidBody) -> BodyState {
    BodyState {
        position: from_na_vec(body.translation()),
        orientation: from_na_quat(body.rotation()),
        linear_velocity: from_na_vec(body.linvel()),
        angular_velocity: from_na_vec(body.angvel()),
    }
}
