use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type FrameIndex = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SideId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitTypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResearchId(pub u32);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for UnitTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ResearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawVitals {
    pub health: Option<f64>,
    pub health_max: Option<f64>,
    pub shield: Option<f64>,
    pub shield_max: Option<f64>,
    pub energy: Option<f64>,
    pub energy_max: Option<f64>,
}

/// Entity record as the observation source delivers it. Every field is
/// optional on the wire; [`RawEntityRecord::validate`] decides whether the
/// record is usable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEntityRecord {
    pub tag: Option<Tag>,
    pub type_id: Option<UnitTypeId>,
    pub is_structure: bool,
    pub position: Option<Position>,
    pub vitals: RawVitals,
    pub build_progress: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vitals {
    pub health: f64,
    pub health_max: f64,
    pub shield: Option<f64>,
    pub shield_max: Option<f64>,
    pub energy: Option<f64>,
    pub energy_max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRecord {
    pub tag: Tag,
    pub type_id: UnitTypeId,
    pub is_structure: bool,
    pub position: Position,
    pub vitals: Vitals,
    pub build_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
    #[error("build_progress {value} is outside [0, 1]")]
    ProgressOutOfRange { value: f64 },
    #[error("tag {tag} appears more than once in the same frame")]
    DuplicateTag { tag: Tag },
    #[error("tag {tag} reappeared after its entity reached a terminal state")]
    ReappearedAfterTerminal { tag: Tag },
    #[error("type {type_id} was first seen as a {expected} and cannot also be a {actual}")]
    KindConflict {
        type_id: UnitTypeId,
        expected: &'static str,
        actual: &'static str,
    },
}

impl RawEntityRecord {
    pub fn validate(&self) -> Result<EntityRecord, MalformedRecord> {
        let tag = self.tag.ok_or(MalformedRecord::MissingField { field: "tag" })?;
        let type_id = self
            .type_id
            .ok_or(MalformedRecord::MissingField { field: "type_id" })?;
        let position = self
            .position
            .ok_or(MalformedRecord::MissingField { field: "position" })?;
        finite("position.x", position.x)?;
        finite("position.y", position.y)?;
        finite("position.z", position.z)?;

        let health = required("vitals.health", self.vitals.health)?;
        let health_max = required("vitals.health_max", self.vitals.health_max)?;
        let shield = optional("vitals.shield", self.vitals.shield)?;
        let shield_max = optional("vitals.shield_max", self.vitals.shield_max)?;
        let energy = optional("vitals.energy", self.vitals.energy)?;
        let energy_max = optional("vitals.energy_max", self.vitals.energy_max)?;

        // Units without a reported progress are fully built.
        let build_progress = match (self.build_progress, self.is_structure) {
            (Some(value), _) => finite("build_progress", value)?,
            (None, false) => 1.0,
            (None, true) => {
                return Err(MalformedRecord::MissingField {
                    field: "build_progress",
                })
            }
        };
        if !(0.0..=1.0).contains(&build_progress) {
            return Err(MalformedRecord::ProgressOutOfRange {
                value: build_progress,
            });
        }

        Ok(EntityRecord {
            tag,
            type_id,
            is_structure: self.is_structure,
            position,
            vitals: Vitals {
                health,
                health_max,
                shield,
                shield_max,
                energy,
                energy_max,
            },
            build_progress,
        })
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, MalformedRecord> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MalformedRecord::NonFinite { field, value })
    }
}

fn required(field: &'static str, value: Option<f64>) -> Result<f64, MalformedRecord> {
    let value = value.ok_or(MalformedRecord::MissingField { field })?;
    finite(field, value)
}

fn optional(field: &'static str, value: Option<f64>) -> Result<Option<f64>, MalformedRecord> {
    value.map(|value| finite(field, value)).transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyRecord {
    pub minerals: i64,
    pub vespene: i64,
    pub food_used: i64,
    pub food_cap: i64,
    pub food_army: i64,
    pub food_workers: i64,
    pub idle_worker_count: i64,
    pub army_count: i64,
    pub collected_minerals: i64,
    pub collected_vespene: i64,
    pub collection_rate_minerals: f64,
    pub collection_rate_vespene: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SideSnapshot {
    pub entities: Vec<RawEntityRecord>,
    pub economy: EconomyRecord,
    pub completed_research: BTreeSet<ResearchId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideMessage {
    pub side: SideId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    pub frame_index: FrameIndex,
    #[serde(default)]
    pub sides: BTreeMap<SideId, SideSnapshot>,
    #[serde(default)]
    pub dead_tags: Vec<Tag>,
    #[serde(default)]
    pub messages: Vec<SideMessage>,
}

impl FrameObservation {
    pub fn new(frame_index: FrameIndex) -> Self {
        Self {
            frame_index,
            sides: BTreeMap::new(),
            dead_tags: Vec::new(),
            messages: Vec::new(),
        }
    }
}
