use serde::{Serialize, Serializer};

use crate::observation::{EconomyRecord, ResearchId, SideId, UnitTypeId};
use crate::tracking::{AssignedId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Float,
    Bool,
    Text,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Text => "text",
        }
    }
}

/// One cell of a row. `Missing` is written as JSON `null`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(&'static str),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn from_optional(value: Option<f64>) -> Self {
        value.map_or(Self::Missing, Self::Float)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Missing => serializer.serialize_none(),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Text(value) => serializer.serialize_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCategory {
    Frame,
    Economy,
    Research,
    Count,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameField {
    FrameIndex,
    TimestampSeconds,
}

impl FrameField {
    pub fn name(self) -> &'static str {
        match self {
            Self::FrameIndex => "frame_index",
            Self::TimestampSeconds => "timestamp_seconds",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EconomyField {
    Minerals,
    Vespene,
    FoodUsed,
    FoodCap,
    FoodArmy,
    FoodWorkers,
    IdleWorkerCount,
    ArmyCount,
    CollectedMinerals,
    CollectedVespene,
    CollectionRateMinerals,
    CollectionRateVespene,
}

impl EconomyField {
    pub const ALL: [EconomyField; 12] = [
        Self::Minerals,
        Self::Vespene,
        Self::FoodUsed,
        Self::FoodCap,
        Self::FoodArmy,
        Self::FoodWorkers,
        Self::IdleWorkerCount,
        Self::ArmyCount,
        Self::CollectedMinerals,
        Self::CollectedVespene,
        Self::CollectionRateMinerals,
        Self::CollectionRateVespene,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Minerals => "minerals",
            Self::Vespene => "vespene",
            Self::FoodUsed => "food_used",
            Self::FoodCap => "food_cap",
            Self::FoodArmy => "food_army",
            Self::FoodWorkers => "food_workers",
            Self::IdleWorkerCount => "idle_worker_count",
            Self::ArmyCount => "army_count",
            Self::CollectedMinerals => "collected_minerals",
            Self::CollectedVespene => "collected_vespene",
            Self::CollectionRateMinerals => "collection_rate_minerals",
            Self::CollectionRateVespene => "collection_rate_vespene",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Self::CollectionRateMinerals | Self::CollectionRateVespene => ValueType::Float,
            _ => ValueType::Int,
        }
    }

    pub fn read(self, economy: &EconomyRecord) -> Value {
        match self {
            Self::Minerals => Value::Int(economy.minerals),
            Self::Vespene => Value::Int(economy.vespene),
            Self::FoodUsed => Value::Int(economy.food_used),
            Self::FoodCap => Value::Int(economy.food_cap),
            Self::FoodArmy => Value::Int(economy.food_army),
            Self::FoodWorkers => Value::Int(economy.food_workers),
            Self::IdleWorkerCount => Value::Int(economy.idle_worker_count),
            Self::ArmyCount => Value::Int(economy.army_count),
            Self::CollectedMinerals => Value::Int(economy.collected_minerals),
            Self::CollectedVespene => Value::Int(economy.collected_vespene),
            Self::CollectionRateMinerals => Value::Float(economy.collection_rate_minerals),
            Self::CollectionRateVespene => Value::Float(economy.collection_rate_vespene),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityField {
    X,
    Y,
    Z,
    Health,
    HealthMax,
    Shield,
    ShieldMax,
    Energy,
    EnergyMax,
    State,
    Progress,
    StartedFrame,
    CompletedFrame,
    DestroyedFrame,
}

const UNIT_FIELDS: [EntityField; 10] = [
    EntityField::X,
    EntityField::Y,
    EntityField::Z,
    EntityField::Health,
    EntityField::HealthMax,
    EntityField::Shield,
    EntityField::ShieldMax,
    EntityField::Energy,
    EntityField::EnergyMax,
    EntityField::State,
];

const STRUCTURE_FIELDS: [EntityField; 12] = [
    EntityField::X,
    EntityField::Y,
    EntityField::Z,
    EntityField::Health,
    EntityField::HealthMax,
    EntityField::Shield,
    EntityField::ShieldMax,
    EntityField::State,
    EntityField::Progress,
    EntityField::StartedFrame,
    EntityField::CompletedFrame,
    EntityField::DestroyedFrame,
];

impl EntityField {
    /// Fields of one entity group in column order.
    pub fn fields_for(kind: EntityKind) -> &'static [EntityField] {
        match kind {
            EntityKind::Unit => &UNIT_FIELDS,
            EntityKind::Structure => &STRUCTURE_FIELDS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
            Self::Health => "health",
            Self::HealthMax => "health_max",
            Self::Shield => "shield",
            Self::ShieldMax => "shield_max",
            Self::Energy => "energy",
            Self::EnergyMax => "energy_max",
            Self::State => "state",
            Self::Progress => "progress",
            Self::StartedFrame => "started_frame",
            Self::CompletedFrame => "completed_frame",
            Self::DestroyedFrame => "destroyed_frame",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Self::State => ValueType::Text,
            Self::StartedFrame | Self::CompletedFrame | Self::DestroyedFrame => ValueType::Int,
            _ => ValueType::Float,
        }
    }

    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            Self::State | Self::StartedFrame | Self::CompletedFrame | Self::DestroyedFrame
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ColumnKind {
    Frame {
        field: FrameField,
    },
    Economy {
        field: EconomyField,
    },
    Research {
        research: ResearchId,
    },
    Count {
        type_id: UnitTypeId,
        entity_kind: EntityKind,
    },
    Entity {
        type_id: UnitTypeId,
        entity_kind: EntityKind,
        slot: u32,
        field: EntityField,
    },
}

impl ColumnKind {
    pub fn category(&self) -> ColumnCategory {
        match self {
            Self::Frame { .. } => ColumnCategory::Frame,
            Self::Economy { .. } => ColumnCategory::Economy,
            Self::Research { .. } => ColumnCategory::Research,
            Self::Count { .. } => ColumnCategory::Count,
            Self::Entity { .. } => ColumnCategory::Entity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub side: Option<SideId>,
    pub kind: ColumnKind,
    pub value_type: ValueType,
}

type ColumnSortKey = (Option<SideId>, ColumnCategory, u32, u32, u8);

impl ColumnDescriptor {
    pub fn frame(field: FrameField) -> Self {
        let value_type = match field {
            FrameField::FrameIndex => ValueType::Int,
            FrameField::TimestampSeconds => ValueType::Float,
        };
        Self {
            name: field.name().to_string(),
            side: None,
            kind: ColumnKind::Frame { field },
            value_type,
        }
    }

    pub fn economy(side: SideId, field: EconomyField) -> Self {
        Self {
            name: format!("{side}_economy_{}", field.name()),
            side: Some(side),
            kind: ColumnKind::Economy { field },
            value_type: field.value_type(),
        }
    }

    pub fn research(side: SideId, research: ResearchId) -> Self {
        Self {
            name: format!("{side}_research_{research}"),
            side: Some(side),
            kind: ColumnKind::Research { research },
            value_type: ValueType::Bool,
        }
    }

    pub fn count(side: SideId, type_id: UnitTypeId, entity_kind: EntityKind) -> Self {
        Self {
            name: format!("{side}_count_{}{type_id}", entity_kind.prefix()),
            side: Some(side),
            kind: ColumnKind::Count {
                type_id,
                entity_kind,
            },
            value_type: ValueType::Int,
        }
    }

    pub fn entity(id: AssignedId, field: EntityField) -> Self {
        Self {
            name: format!("{id}_{}", field.name()),
            side: Some(id.side),
            kind: ColumnKind::Entity {
                type_id: id.type_id,
                entity_kind: id.kind,
                slot: id.slot,
                field,
            },
            value_type: field.value_type(),
        }
    }

    /// Ordering key: side (base columns first), category, type, slot, field.
    pub(crate) fn sort_key(&self) -> ColumnSortKey {
        let category = self.kind.category();
        match self.kind {
            ColumnKind::Frame { field } => (self.side, category, 0, 0, field as u8),
            ColumnKind::Economy { field } => (self.side, category, 0, 0, field as u8),
            ColumnKind::Research { research } => (self.side, category, research.0, 0, 0),
            ColumnKind::Count { type_id, .. } => (self.side, category, type_id.0, 0, 0),
            ColumnKind::Entity {
                type_id,
                slot,
                field,
                ..
            } => (self.side, category, type_id.0, slot, field as u8),
        }
    }

    pub fn description(&self) -> String {
        let side = self
            .side
            .map_or_else(String::new, |side| format!("{side} "));
        match self.kind {
            ColumnKind::Frame {
                field: FrameField::FrameIndex,
            } => "simulation frame index of the row".to_string(),
            ColumnKind::Frame {
                field: FrameField::TimestampSeconds,
            } => "frame index divided by frames per second".to_string(),
            ColumnKind::Economy { field } => {
                format!("{side}economy counter `{}`", field.name())
            }
            ColumnKind::Research { research } => {
                format!("{side}has completed research {}", research.0)
            }
            ColumnKind::Count {
                type_id,
                entity_kind,
            } => format!(
                "{side}number of live {}s of type {type_id}",
                entity_kind.label()
            ),
            ColumnKind::Entity {
                type_id,
                entity_kind,
                slot,
                field,
            } => format!(
                "{side}{} of type {type_id}, slot {slot}: {}",
                entity_kind.label(),
                field.name()
            ),
        }
    }
}
