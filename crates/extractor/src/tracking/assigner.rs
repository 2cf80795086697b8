use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::observation::{FrameIndex, SideId, Tag, UnitTypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Unit,
    Structure,
}

impl EntityKind {
    pub fn of(is_structure: bool) -> Self {
        if is_structure {
            Self::Structure
        } else {
            Self::Unit
        }
    }

    pub fn prefix(self) -> char {
        match self {
            Self::Unit => 'u',
            Self::Structure => 's',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Structure => "structure",
        }
    }
}

/// Stable, human-readable entity identifier, rendered as `p1_u48_001`.
/// Slots start at 1 and are recycled once their occupant is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssignedId {
    pub side: SideId,
    pub type_id: UnitTypeId,
    pub kind: EntityKind,
    pub slot: u32,
}

impl fmt::Display for AssignedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}{}_{:03}",
            self.side,
            self.kind.prefix(),
            self.type_id,
            self.slot
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Assignment {
    id: AssignedId,
    serial: u64,
    released: bool,
}

#[derive(Debug, Default)]
struct SlotPool {
    slot_count: u32,
    next_serial: u64,
    // slot -> frame it was vacated on
    free: BTreeMap<u32, FrameIndex>,
}

impl SlotPool {
    fn claim(&mut self, frame_index: FrameIndex) -> u32 {
        let reusable = self
            .free
            .iter()
            .find(|(_, vacated)| **vacated != frame_index)
            .map(|(slot, _)| *slot)
            .or_else(|| self.free.keys().next().copied());
        match reusable {
            Some(slot) => {
                self.free.remove(&slot);
                slot
            }
            None => {
                self.slot_count = self.slot_count.saturating_add(1);
                self.slot_count
            }
        }
    }

    fn allocate_serial(&mut self) -> u64 {
        self.next_serial = self.next_serial.saturating_add(1);
        self.next_serial
    }
}

#[derive(Debug, Default)]
pub struct IdentifierAssigner {
    by_tag: HashMap<Tag, Assignment>,
    pools: BTreeMap<(SideId, UnitTypeId), SlotPool>,
}

impl IdentifierAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id bound to `tag`, assigning the next slot for
    /// `(side, type_id)` the first time the tag is seen.
    pub fn assign(
        &mut self,
        tag: Tag,
        type_id: UnitTypeId,
        kind: EntityKind,
        side: SideId,
        frame_index: FrameIndex,
    ) -> AssignedId {
        if let Some(existing) = self.by_tag.get(&tag) {
            return existing.id;
        }
        let pool = self.pools.entry((side, type_id)).or_default();
        let slot = pool.claim(frame_index);
        let serial = pool.allocate_serial();
        let id = AssignedId {
            side,
            type_id,
            kind,
            slot,
        };
        self.by_tag.insert(
            tag,
            Assignment {
                id,
                serial,
                released: false,
            },
        );
        id
    }

    /// Returns the slot of `tag` to its pool. The tag keeps its id.
    pub fn release(&mut self, tag: Tag, frame_index: FrameIndex) -> bool {
        let Some(assignment) = self.by_tag.get_mut(&tag) else {
            return false;
        };
        if assignment.released {
            return false;
        }
        assignment.released = true;
        let key = (assignment.id.side, assignment.id.type_id);
        if let Some(pool) = self.pools.get_mut(&key) {
            pool.free.insert(assignment.id.slot, frame_index);
        }
        true
    }

    pub fn lookup(&self, tag: Tag) -> Option<AssignedId> {
        self.by_tag.get(&tag).map(|assignment| assignment.id)
    }

    /// Per-type running count of every entity ever assigned, starting at 1.
    pub fn serial(&self, tag: Tag) -> Option<u64> {
        self.by_tag.get(&tag).map(|assignment| assignment.serial)
    }

    pub fn slot_count(&self, side: SideId, type_id: UnitTypeId) -> u32 {
        self.pools
            .get(&(side, type_id))
            .map_or(0, |pool| pool.slot_count)
    }

    pub fn reset(&mut self) {
        self.by_tag.clear();
        self.pools.clear();
    }
}
