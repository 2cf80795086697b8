mod columns;
mod discovery;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

pub use columns::{
    ColumnCategory, ColumnDescriptor, ColumnKind, EconomyField, EntityField, FrameField, Value,
    ValueType,
};
pub use discovery::{discover_schema, Discovery};

use crate::hashing::hash_column_layout;
use crate::observation::{FrameIndex, ResearchId, SideId, UnitTypeId};
use crate::tracking::{AssignedId, EntityKind};

#[derive(Debug, Error)]
pub enum SchemaConsistencyError {
    #[error("frame {frame_index}: side {side} is not part of the discovered schema")]
    UnknownSide {
        side: SideId,
        frame_index: FrameIndex,
    },
    #[error("frame {frame_index}: {side} type {type_id} has no column group")]
    UnknownGroup {
        side: SideId,
        type_id: UnitTypeId,
        frame_index: FrameIndex,
    },
    #[error("frame {frame_index}: {id} exceeds the {slots} slot(s) discovered for its type")]
    SlotOutOfRange {
        id: AssignedId,
        slots: u32,
        frame_index: FrameIndex,
    },
    #[error("frame {frame_index}: research {research} completed by {side} has no column")]
    UnknownResearch {
        side: SideId,
        research: ResearchId,
        frame_index: FrameIndex,
    },
    #[error("frame {frame_index} does not fit the signed 64-bit frame_index column")]
    FrameIndexOutOfRange { frame_index: FrameIndex },
    #[error(
        "frame sequence diverged between passes: discovery saw {expected_frames} frame(s) \
(sha256 {expected_sha256_hex}), row building saw {actual_frames} frame(s) (sha256 {actual_sha256_hex})"
    )]
    FrameSequenceDiverged {
        expected_frames: u64,
        actual_frames: u64,
        expected_sha256_hex: String,
        actual_sha256_hex: String,
    },
}

/// Discovered content for one side, before it is laid out as columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidePlan {
    pub research: BTreeSet<ResearchId>,
    pub groups: BTreeMap<UnitTypeId, GroupPlan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPlan {
    pub kind: EntityKind,
    pub peak: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub sides: BTreeMap<SideId, SidePlan>,
}

/// Column positions of one `(side, type)` entity group. Entity columns of a
/// group are contiguous, slot-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    pub kind: EntityKind,
    pub slots: u32,
    pub count_column: usize,
    pub first_column: usize,
}

impl GroupLayout {
    pub fn column(&self, slot: u32, field: EntityField) -> Option<usize> {
        if slot == 0 || slot > self.slots {
            return None;
        }
        let fields = EntityField::fields_for(self.kind);
        let position = fields.iter().position(|candidate| *candidate == field)?;
        Some(self.first_column + (slot as usize - 1) * fields.len() + position)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideLayout {
    economy: BTreeMap<EconomyField, usize>,
    research: BTreeMap<ResearchId, usize>,
    groups: BTreeMap<UnitTypeId, GroupLayout>,
}

impl SideLayout {
    pub fn economy_column(&self, field: EconomyField) -> Option<usize> {
        self.economy.get(&field).copied()
    }

    pub fn research_columns(&self) -> impl Iterator<Item = (ResearchId, usize)> + '_ {
        self.research.iter().map(|(research, column)| (*research, *column))
    }

    pub fn research_column(&self, research: ResearchId) -> Option<usize> {
        self.research.get(&research).copied()
    }

    pub fn groups(&self) -> impl Iterator<Item = (UnitTypeId, &GroupLayout)> + '_ {
        self.groups.iter().map(|(type_id, group)| (*type_id, group))
    }

    pub fn group(&self, type_id: UnitTypeId) -> Option<&GroupLayout> {
        self.groups.get(&type_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnDescriptor>,
    sides: BTreeMap<SideId, SideLayout>,
    frame_index_column: usize,
    timestamp_column: usize,
    fingerprint_sha256_hex: String,
}

impl Schema {
    pub fn from_plan(plan: &SchemaPlan) -> Self {
        let mut columns = vec![
            ColumnDescriptor::frame(FrameField::FrameIndex),
            ColumnDescriptor::frame(FrameField::TimestampSeconds),
        ];
        for (side, side_plan) in &plan.sides {
            for field in EconomyField::ALL {
                columns.push(ColumnDescriptor::economy(*side, field));
            }
            for research in &side_plan.research {
                columns.push(ColumnDescriptor::research(*side, *research));
            }
            for (type_id, group) in &side_plan.groups {
                columns.push(ColumnDescriptor::count(*side, *type_id, group.kind));
                for slot in 1..=group.peak {
                    let id = AssignedId {
                        side: *side,
                        type_id: *type_id,
                        kind: group.kind,
                        slot,
                    };
                    for field in EntityField::fields_for(group.kind) {
                        columns.push(ColumnDescriptor::entity(id, *field));
                    }
                }
            }
        }
        columns.sort_by_key(ColumnDescriptor::sort_key);
        Self::from_sorted_columns(columns)
    }

    fn from_sorted_columns(columns: Vec<ColumnDescriptor>) -> Self {
        let mut sides = BTreeMap::<SideId, SideLayout>::new();
        let mut frame_index_column = 0;
        let mut timestamp_column = 0;
        for (index, column) in columns.iter().enumerate() {
            let Some(side) = column.side else {
                match column.kind {
                    ColumnKind::Frame {
                        field: FrameField::FrameIndex,
                    } => frame_index_column = index,
                    ColumnKind::Frame {
                        field: FrameField::TimestampSeconds,
                    } => timestamp_column = index,
                    _ => {}
                }
                continue;
            };
            let layout = sides.entry(side).or_default();
            match column.kind {
                ColumnKind::Frame { .. } => {}
                ColumnKind::Economy { field } => {
                    layout.economy.insert(field, index);
                }
                ColumnKind::Research { research } => {
                    layout.research.insert(research, index);
                }
                ColumnKind::Count {
                    type_id,
                    entity_kind,
                } => {
                    layout.groups.insert(
                        type_id,
                        GroupLayout {
                            kind: entity_kind,
                            slots: 0,
                            count_column: index,
                            first_column: index + 1,
                        },
                    );
                }
                ColumnKind::Entity {
                    type_id,
                    slot,
                    field,
                    ..
                } => {
                    if let Some(group) = layout.groups.get_mut(&type_id) {
                        if field == EntityField::X && slot == 1 {
                            group.first_column = index;
                        }
                        group.slots = group.slots.max(slot);
                    }
                }
            }
        }

        let fingerprint_sha256_hex = hash_column_layout(
            columns
                .iter()
                .map(|column| (column.name.as_str(), column.value_type.as_str())),
        );
        Self {
            columns,
            sides,
            frame_index_column,
            timestamp_column,
            fingerprint_sha256_hex,
        }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn sides(&self) -> impl Iterator<Item = (SideId, &SideLayout)> + '_ {
        self.sides.iter().map(|(side, layout)| (*side, layout))
    }

    pub fn side(&self, side: SideId) -> Option<&SideLayout> {
        self.sides.get(&side)
    }

    pub fn group(&self, side: SideId, type_id: UnitTypeId) -> Option<&GroupLayout> {
        self.sides.get(&side)?.group(type_id)
    }

    pub fn frame_index_column(&self) -> usize {
        self.frame_index_column
    }

    pub fn timestamp_column(&self) -> usize {
        self.timestamp_column
    }

    /// sha256 over the ordered column names and value types.
    pub fn fingerprint_sha256_hex(&self) -> &str {
        &self.fingerprint_sha256_hex
    }
}
