//! Entity materializer.
//!
//! Turns level descriptors into physics bodies. Force zones get a ledger
//! binding; win/death zones are remembered as outcome zones. Descriptors that
//! cannot be built are skipped and counted, never fatal.

use std::collections::BTreeMap;

use ballance_shared::{
    level::{Behaviour, BodyRole, EntityDescriptor, Level, ShapeDesc, SkipReason},
    net::BodyId,
    physics::PhysicsConfig,
};
use rapier3d::prelude::ColliderBuilder;
use tracing::{debug, info, warn};

use crate::{
    ledger::ForceLedger,
    world::{BodySpec, PhysicsWorld},
};

/// Which game outcome a zone resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Win,
    Death,
}

/// A body created from one descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Materialized {
    pub body: BodyId,
    pub role: BodyRole,
    /// Position of the descriptor in the level's `entities` array; the
    /// identity to use outside this process.
    pub descriptor_index: usize,
}

/// Counts gathered while materializing a level.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub created: usize,
    pub skipped: usize,
    pub unknown_type: usize,
    pub unknown_shape: usize,
    pub missing_field: usize,
    pub malformed: usize,
}

impl MaterializeReport {
    fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        match reason {
            SkipReason::UnknownType => self.unknown_type += 1,
            SkipReason::UnknownShape => self.unknown_shape += 1,
            SkipReason::MissingShape
            | SkipReason::MissingMagnitude
            | SkipReason::MissingPosition => self.missing_field += 1,
            SkipReason::Malformed => self.malformed += 1,
        }
    }
}

/// Everything the level produced.
#[derive(Debug, Default)]
pub struct LevelBodies {
    /// Player bodies in spawn order.
    pub players: Vec<BodyId>,
    pub outcome_zones: BTreeMap<BodyId, OutcomeKind>,
    pub bodies: Vec<Materialized>,
    pub report: MaterializeReport,
}

fn collider_for(shape: ShapeDesc) -> Option<ColliderBuilder> {
    match shape {
        ShapeDesc::Box { half_extents } => Some(ColliderBuilder::cuboid(
            half_extents.x,
            half_extents.y,
            half_extents.z,
        )),
        ShapeDesc::Cylinder {
            radius,
            half_length,
        } => Some(ColliderBuilder::cylinder(half_length, radius)),
        ShapeDesc::Sphere { radius } => Some(ColliderBuilder::ball(radius)),
        ShapeDesc::Unrecognized => None,
    }
}

/// Materializes one descriptor.
///
/// Returns `Err` with the skip reason when no body was created.
pub fn materialize(
    desc: &EntityDescriptor,
    descriptor_index: usize,
    world: &mut PhysicsWorld,
    ledger: &mut ForceLedger,
    cfg: &PhysicsConfig,
) -> Result<Materialized, SkipReason> {
    let role = desc.classify()?;
    let (position, orientation) = desc.pose();

    let (collider, mass) = match role {
        BodyRole::Player => (ColliderBuilder::ball(cfg.player_radius), cfg.player_mass),
        BodyRole::WorldObject(behaviour) => {
            let collider = desc
                .shape
                .and_then(collider_for)
                .ok_or(SkipReason::UnknownShape)?;
            let mass = match behaviour {
                Behaviour::Static => 0.0,
                Behaviour::Dynamic => cfg.dynamic_object_mass,
            };
            (collider, mass)
        }
        BodyRole::ForceZone(_) | BodyRole::WinZone | BodyRole::DeathZone => {
            let collider = desc
                .shape
                .and_then(collider_for)
                .ok_or(SkipReason::UnknownShape)?;
            (collider, 0.0)
        }
    };

    let body = world.insert(
        BodySpec {
            position,
            orientation,
            mass,
            is_trigger: role.is_trigger(),
        },
        collider,
    );

    if let BodyRole::ForceZone(magnitude) = role {
        ledger.bind_zone(body, magnitude);
    }

    debug!(body = body.0, descriptor_index, ?role, "Materialized entity");
    Ok(Materialized {
        body,
        role,
        descriptor_index,
    })
}

/// Materializes every descriptor of a level, in file order.
pub fn materialize_level(
    level: &Level,
    world: &mut PhysicsWorld,
    ledger: &mut ForceLedger,
    cfg: &PhysicsConfig,
) -> LevelBodies {
    let mut out = LevelBodies::default();
    for (index, desc) in level.entities().iter().enumerate() {
        match materialize(desc, index, world, ledger, cfg) {
            Ok(m) => {
                out.report.created += 1;
                match m.role {
                    BodyRole::Player => out.players.push(m.body),
                    BodyRole::WinZone => {
                        out.outcome_zones.insert(m.body, OutcomeKind::Win);
                    }
                    BodyRole::DeathZone => {
                        out.outcome_zones.insert(m.body, OutcomeKind::Death);
                    }
                    BodyRole::WorldObject(_) | BodyRole::ForceZone(_) => {}
                }
                out.bodies.push(m);
            }
            Err(reason) => {
                warn!(descriptor_index = index, kind = ?desc.kind, ?reason, "Skipping level entity");
                out.report.record_skip(reason);
            }
        }
    }
    info!(
        created = out.report.created,
        skipped = out.report.skipped,
        players = out.players.len(),
        force_zones = ledger.zone_count(),
        outcome_zones = out.outcome_zones.len(),
        "Level materialized"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballance_shared::math::Vec3;

    const LEVEL: &str = r#"{
        "entities": [
            { "type": "Ballance$PlayerSpawn", "position": { "x": 0, "y": 1, "z": 0 } },
            { "type": "Ballance$PlayerSpawn", "position": { "x": 3, "y": 1, "z": 0 } },
            {
                "type": "Ballance$WorldObject", "behaviour": "static",
                "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 10, "y": 0.5, "z": 10 } },
                "position": { "x": 0, "y": -0.5, "z": 0 }
            },
            {
                "type": "Ballance$WorldObject", "behaviour": "dynamic",
                "shape": { "type": "Ballance$CylinderShape", "radius": 0.5, "halfLength": 1 },
                "position": { "x": -3, "y": 2, "z": 0 }
            },
            {
                "type": "Ballance$ForceZone",
                "shape": { "type": "Ballance$SphereShape", "radius": 2 },
                "position": { "x": 0, "y": 0, "z": 8 },
                "magnitude": { "x": 0, "y": 10, "z": 0 }
            },
            {
                "type": "Ballance$WinZone",
                "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 1, "y": 1, "z": 1 } },
                "position": { "x": 0, "y": 0, "z": 20 }
            },
            {
                "type": "Ballance$DeathZone",
                "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 50, "y": 1, "z": 50 } },
                "position": { "x": 0, "y": -30, "z": 0 }
            },
            { "type": "Ballance$Spinner", "position": { "x": 0, "y": 0, "z": 0 } },
            { "type": "Ballance$Comment", "text": "no position here" },
            { "type": "Ballance$PlayerSpawn", "position": "origin" },
            {
                "type": "Ballance$WorldObject",
                "shape": { "type": "Ballance$TorusShape", "radius": 1 },
                "position": { "x": 0, "y": 0, "z": 0 }
            }
        ]
    }"#;

    fn build() -> (PhysicsWorld, ForceLedger, LevelBodies) {
        let cfg = PhysicsConfig::default();
        let level = Level::from_json_str(LEVEL).unwrap();
        let mut world = PhysicsWorld::new(&cfg);
        let mut ledger = ForceLedger::new();
        let out = materialize_level(&level, &mut world, &mut ledger, &cfg);
        (world, ledger, out)
    }

    #[test]
    fn builds_one_body_per_valid_descriptor() {
        let (world, ledger, out) = build();
        assert_eq!(world.len(), 7);
        assert_eq!(out.players.len(), 2);
        assert_eq!(ledger.zone_count(), 1);
        assert_eq!(out.outcome_zones.len(), 2);
        assert_eq!(
            out.report,
            MaterializeReport {
                created: 7,
                skipped: 4,
                unknown_type: 2,
                unknown_shape: 1,
                missing_field: 0,
                malformed: 1,
            }
        );
    }

    #[test]
    fn descriptor_index_is_kept() {
        let (_, _, out) = build();
        let indices: Vec<_> = out.bodies.iter().map(|m| m.descriptor_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn players_are_dynamic_and_static_objects_are_fixed() {
        let (world, _, out) = build();
        assert!(world.mass(out.players[0]) > 0.0);
        let floor = out.bodies[2].body;
        assert_eq!(world.mass(floor), 0.0);
        let barrel = out.bodies[3].body;
        assert!(world.mass(barrel) > 0.0);
    }

    #[test]
    fn spawn_pose_matches_descriptor() {
        let (world, _, out) = build();
        let s = world.state(out.players[1]).unwrap();
        assert_eq!(s.position, Vec3::new(3.0, 1.0, 0.0));
    }

    #[test]
    fn zones_are_triggers_without_mass() {
        let (world, ledger, out) = build();
        let zone = out.bodies[4].body;
        assert!(ledger.is_zone(zone));
        assert_eq!(world.mass(zone), 0.0);
        assert_eq!(out.outcome_zones.get(&out.bodies[5].body), Some(&OutcomeKind::Win));
        assert_eq!(out.outcome_zones.get(&out.bodies[6].body), Some(&OutcomeKind::Death));
    }
}
