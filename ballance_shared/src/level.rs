//! Level loader.
//!
//! A level is a JSON document with a top-level `entities` array. Each record
//! describes one entity; the order of the array is preserved. The raw
//! document is kept as well so it can be forwarded to clients unchanged.
//!
//! # Usage
//! ```ignore
//! let level = Level::load("levels/world.json")?;
//! println!("Level: {} entities", level.entities().len());
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LevelLoadError;
use crate::math::{Quat, Vec3};

/// Entity type tag.
///
/// Level files spell these with the `Ballance$` prefix; bare names are
/// accepted too. Anything else lands in `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "Ballance$PlayerSpawn", alias = "PlayerSpawn")]
    PlayerSpawn,
    #[serde(rename = "Ballance$WorldObject", alias = "WorldObject")]
    WorldObject,
    #[serde(rename = "Ballance$ForceZone", alias = "ForceZone")]
    ForceZone,
    #[serde(rename = "Ballance$WinZone", alias = "WinZone")]
    WinZone,
    #[serde(rename = "Ballance$DeathZone", alias = "DeathZone")]
    DeathZone,
    #[serde(other)]
    Unrecognized,
}

/// Collision shape of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShapeDesc {
    #[serde(rename = "Ballance$BoxShape", alias = "Box")]
    Box {
        #[serde(rename = "halfExtents")]
        half_extents: Vec3,
    },
    /// Y-aligned cylinder.
    #[serde(rename = "Ballance$CylinderShape", alias = "Cylinder")]
    Cylinder {
        radius: f32,
        #[serde(rename = "halfLength")]
        half_length: f32,
    },
    #[serde(rename = "Ballance$SphereShape", alias = "Sphere")]
    Sphere { radius: f32 },
    #[serde(other)]
    Unrecognized,
}

/// Whether a world object takes part in dynamics.
///
/// Only the literal `"static"` is static; any other value is dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behaviour {
    Static,
    #[default]
    #[serde(other)]
    Dynamic,
}

/// One record of the level's `entities` array. Immutable after load.
///
/// A record whose fields do not fit this layout still loads: it keeps its
/// type tag (if readable) and classifies as [`SkipReason::Malformed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub euler_rotation: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<Behaviour>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<Vec3>,
    #[serde(skip)]
    malformed: bool,
}

/// What a descriptor turns into once materialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyRole {
    Player,
    WorldObject(Behaviour),
    ForceZone(Vec3),
    WinZone,
    DeathZone,
}

impl BodyRole {
    /// Trigger volumes detect overlap but take no part in collision response.
    pub fn is_trigger(self) -> bool {
        matches!(
            self,
            BodyRole::ForceZone(_) | BodyRole::WinZone | BodyRole::DeathZone
        )
    }
}

/// Why a descriptor produced no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownType,
    UnknownShape,
    MissingShape,
    MissingMagnitude,
    MissingPosition,
    /// A known type whose fields have the wrong shape.
    Malformed,
}

impl EntityDescriptor {
    /// Validates the type-specific fields and returns the body role.
    ///
    /// Server and client both use this, so they agree on which descriptors
    /// yield a body and therefore on the snapshot layout.
    pub fn classify(&self) -> Result<BodyRole, SkipReason> {
        if self.kind == EntityKind::Unrecognized {
            return Err(SkipReason::UnknownType);
        }
        if self.malformed {
            return Err(SkipReason::Malformed);
        }
        if self.position.is_none() {
            return Err(SkipReason::MissingPosition);
        }
        let role = match self.kind {
            EntityKind::Unrecognized => return Err(SkipReason::UnknownType),
            EntityKind::PlayerSpawn => return Ok(BodyRole::Player),
            EntityKind::WorldObject => BodyRole::WorldObject(self.behaviour.unwrap_or_default()),
            EntityKind::ForceZone => {
                BodyRole::ForceZone(self.magnitude.ok_or(SkipReason::MissingMagnitude)?)
            }
            EntityKind::WinZone => BodyRole::WinZone,
            EntityKind::DeathZone => BodyRole::DeathZone,
        };
        match self.shape {
            None => Err(SkipReason::MissingShape),
            Some(ShapeDesc::Unrecognized) => Err(SkipReason::UnknownShape),
            Some(_) => Ok(role),
        }
    }

    /// Orientation as Euler angles; zero when the record has none.
    pub fn rotation(&self) -> Vec3 {
        self.euler_rotation.unwrap_or(Vec3::ZERO)
    }

    /// Initial position and orientation. Records without a position never
    /// classify as a body, so the zero fallback is not observable.
    pub fn pose(&self) -> (Vec3, Quat) {
        (
            self.position.unwrap_or(Vec3::ZERO),
            Quat::from_euler_xyz(self.rotation()),
        )
    }

    /// Decodes one record. Only the `entities` array itself is validated
    /// strictly; a bad record becomes a descriptor that will be skipped.
    fn from_record(index: usize, record: &serde_json::Value) -> Self {
        match Self::deserialize(record) {
            Ok(desc) => desc,
            Err(e) => {
                let kind = record
                    .get("type")
                    .and_then(|t| EntityKind::deserialize(t).ok())
                    .unwrap_or(EntityKind::Unrecognized);
                if kind != EntityKind::Unrecognized {
                    warn!(index, ?kind, error = %e, "Malformed entity record");
                }
                Self {
                    kind,
                    shape: None,
                    position: None,
                    euler_rotation: None,
                    behaviour: None,
                    magnitude: None,
                    malformed: true,
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct LevelDoc {
    entities: Vec<serde_json::Value>,
}

/// A loaded level: ordered descriptors plus the document they came from.
#[derive(Debug, Clone)]
pub struct Level {
    raw: Arc<serde_json::Value>,
    entities: Vec<EntityDescriptor>,
}

impl Level {
    /// Reads and parses a level file. Any failure is fatal for the caller.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LevelLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LevelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(s: &str) -> Result<Self, LevelLoadError> {
        Self::from_value(serde_json::from_str(s)?)
    }

    /// Parses an already decoded document, e.g. the one carried by `StartGame`.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, LevelLoadError> {
        let doc = LevelDoc::deserialize(&raw)?;
        let entities = doc
            .entities
            .iter()
            .enumerate()
            .map(|(i, record)| EntityDescriptor::from_record(i, record))
            .collect();
        Ok(Self {
            raw: Arc::new(raw),
            entities,
        })
    }

    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// The document exactly as parsed, for verbatim forwarding.
    pub fn raw(&self) -> &Arc<serde_json::Value> {
        &self.raw
    }

    /// Number of usable player spawns, i.e. the session capacity.
    pub fn spawn_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| e.classify() == Ok(BodyRole::Player))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: &str = r#"{
        "entities": [
            { "type": "Ballance$PlayerSpawn", "position": { "x": 0, "y": 1, "z": 0 } },
            {
                "type": "Ballance$WorldObject",
                "behaviour": "static",
                "shape": { "type": "Ballance$BoxShape", "halfExtents": { "x": 10, "y": 0.5, "z": 10 } },
                "position": { "x": 0, "y": -0.5, "z": 0 },
                "eulerRotation": { "x": 0, "y": 0.5, "z": 0 }
            },
            {
                "type": "Ballance$ForceZone",
                "shape": { "type": "Ballance$CylinderShape", "radius": 2, "halfLength": 1 },
                "position": { "x": 0, "y": 0, "z": 5 },
                "magnitude": { "x": 0, "y": 0, "z": -50 }
            },
            {
                "type": "Ballance$Trampoline",
                "shape": { "type": "Ballance$SphereShape", "radius": 1 },
                "position": { "x": 0, "y": 0, "z": 0 }
            },
            {
                "type": "DeathZone",
                "shape": { "type": "Ballance$ConeShape", "radius": 1 },
                "position": { "x": 0, "y": -20, "z": 0 }
            }
        ]
    }"#;

    #[test]
    fn parses_entities_in_file_order() {
        let level = Level::from_json_str(LEVEL).unwrap();
        let kinds: Vec<_> = level.entities().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::PlayerSpawn,
                EntityKind::WorldObject,
                EntityKind::ForceZone,
                EntityKind::Unrecognized,
                EntityKind::DeathZone,
            ]
        );
        assert_eq!(level.spawn_count(), 1);
        assert_eq!(level.entities()[1].rotation(), Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(level.entities()[0].rotation(), Vec3::ZERO);
    }

    #[test]
    fn classify_resolves_roles_and_skips() {
        let level = Level::from_json_str(LEVEL).unwrap();
        let roles: Vec<_> = level.entities().iter().map(|e| e.classify()).collect();
        assert_eq!(roles[0], Ok(BodyRole::Player));
        assert_eq!(roles[1], Ok(BodyRole::WorldObject(Behaviour::Static)));
        assert_eq!(
            roles[2],
            Ok(BodyRole::ForceZone(Vec3::new(0.0, 0.0, -50.0)))
        );
        assert_eq!(roles[3], Err(SkipReason::UnknownType));
        assert_eq!(roles[4], Err(SkipReason::UnknownShape));
    }

    #[test]
    fn behaviour_other_than_static_is_dynamic() {
        let b: Behaviour = serde_json::from_str(r#""wobbly""#).unwrap();
        assert_eq!(b, Behaviour::Dynamic);
        let b: Behaviour = serde_json::from_str(r#""static""#).unwrap();
        assert_eq!(b, Behaviour::Static);
    }

    #[test]
    fn force_zone_without_magnitude_is_skipped() {
        let desc: EntityDescriptor = serde_json::from_str(
            r#"{ "type": "ForceZone", "shape": { "type": "Sphere", "radius": 1 },
                 "position": { "x": 0, "y": 0, "z": 0 } }"#,
        )
        .unwrap();
        assert_eq!(desc.classify(), Err(SkipReason::MissingMagnitude));
    }

    #[test]
    fn unknown_record_without_known_fields_still_loads() {
        let level = Level::from_json_str(
            r#"{ "entities": [
                { "type": "Ballance$Comment", "text": "hello" },
                { "type": "Ballance$PlayerSpawn", "position": { "x": 0, "y": 1, "z": 0 } }
            ] }"#,
        )
        .unwrap();
        assert_eq!(level.entities().len(), 2);
        assert_eq!(level.entities()[0].kind, EntityKind::Unrecognized);
        assert_eq!(level.entities()[0].classify(), Err(SkipReason::UnknownType));
        assert_eq!(level.entities()[1].classify(), Ok(BodyRole::Player));
        assert_eq!(level.spawn_count(), 1);
    }

    #[test]
    fn bad_records_of_known_types_are_skipped() {
        let level = Level::from_json_str(
            r#"{ "entities": [
                { "type": "Ballance$PlayerSpawn" },
                { "type": "Ballance$PlayerSpawn", "position": "north" },
                { "type": "WinZone", "shape": { "type": "Sphere", "radius": "big" },
                  "position": { "x": 0, "y": 0, "z": 0 } },
                "not a record",
                { "type": "Ballance$PlayerSpawn", "position": { "x": 1, "y": 1, "z": 1 } }
            ] }"#,
        )
        .unwrap();
        let roles: Vec<_> = level.entities().iter().map(|e| e.classify()).collect();
        assert_eq!(
            roles,
            vec![
                Err(SkipReason::MissingPosition),
                Err(SkipReason::Malformed),
                Err(SkipReason::Malformed),
                Err(SkipReason::UnknownType),
                Ok(BodyRole::Player),
            ]
        );
        assert_eq!(level.entities()[1].kind, EntityKind::PlayerSpawn);
        assert_eq!(level.spawn_count(), 1);
    }

    #[test]
    fn raw_document_is_kept_verbatim() {
        let level = Level::from_json_str(LEVEL).unwrap();
        let expected: serde_json::Value = serde_json::from_str(LEVEL).unwrap();
        assert_eq!(**level.raw(), expected);
    }

    #[test]
    fn malformed_level_is_rejected() {
        assert!(matches!(
            Level::from_json_str("{ not json"),
            Err(LevelLoadError::Malformed(_))
        ));
        assert!(matches!(
            Level::from_json_str(r#"{ "things": [] }"#),
            Err(LevelLoadError::Malformed(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Level::load("definitely/not/here.json").unwrap_err();
        assert!(matches!(err, LevelLoadError::Io { .. }));
    }
}
