use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::assigner::{AssignedId, EntityKind, IdentifierAssigner};
use crate::observation::{
    EntityRecord, FrameIndex, FrameObservation, MalformedRecord, RawEntityRecord, SideId, Tag,
    UnitTypeId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Built,
    Existing,
    Killed,
    Started,
    Building,
    Completed,
    Destroyed,
    Cancelled,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Existing => "existing",
            Self::Killed => "killed",
            Self::Started => "started",
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Destroyed => "destroyed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Killed | Self::Destroyed | Self::Cancelled)
    }
}

/// Ledger entry for one entity across the whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEntity {
    pub tag: Tag,
    pub assigned_id: AssignedId,
    pub serial: u64,
    pub side: SideId,
    pub type_id: UnitTypeId,
    pub is_structure: bool,
    pub first_seen_frame: FrameIndex,
    pub completed_frame: Option<FrameIndex>,
    pub destroyed_frame: Option<FrameIndex>,
    pub current_state: LifecycleState,
}

impl TrackedEntity {
    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }
}

/// What the tracker concluded about one entity on one frame. `record` is
/// `None` exactly on the entity's terminal frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFrameState {
    pub id: AssignedId,
    pub tag: Tag,
    pub state: LifecycleState,
    pub record: Option<EntityRecord>,
    pub first_seen_frame: FrameIndex,
    pub completed_frame: Option<FrameIndex>,
    pub destroyed_frame: Option<FrameIndex>,
}

impl EntityFrameState {
    fn of(entity: &TrackedEntity, record: Option<EntityRecord>) -> Self {
        Self {
            id: entity.assigned_id,
            tag: entity.tag,
            state: entity.current_state,
            record,
            first_seen_frame: entity.first_seen_frame,
            completed_frame: entity.completed_frame,
            destroyed_frame: entity.destroyed_frame,
        }
    }

    pub fn is_live(&self) -> bool {
        self.record.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameReport {
    pub frame_index: FrameIndex,
    pub entities: Vec<EntityFrameState>,
    pub dropped_records: usize,
    /// Live entities whose only record this frame was dropped. They keep
    /// their slot and state but have no values for the frame.
    pub held: Vec<AssignedId>,
}

impl FrameReport {
    pub fn live(&self) -> impl Iterator<Item = &EntityFrameState> {
        self.entities.iter().filter(|entity| entity.is_live())
    }

    pub fn terminal(&self) -> impl Iterator<Item = &EntityFrameState> {
        self.entities.iter().filter(|entity| !entity.is_live())
    }

    pub fn live_counts(&self) -> BTreeMap<(SideId, UnitTypeId), (EntityKind, u32)> {
        let mut counts = BTreeMap::new();
        for entity in self.live() {
            let entry = counts
                .entry((entity.id.side, entity.id.type_id))
                .or_insert((entity.id.kind, 0u32));
            entry.1 = entry.1.saturating_add(1);
        }
        counts
    }

    /// Slots in use per `(side, type)`: live entities plus held ones.
    pub fn occupied_counts(&self) -> BTreeMap<(SideId, UnitTypeId), (EntityKind, u32)> {
        let mut counts = self.live_counts();
        for id in &self.held {
            let entry = counts
                .entry((id.side, id.type_id))
                .or_insert((id.kind, 0u32));
            entry.1 = entry.1.saturating_add(1);
        }
        counts
    }
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    assigner: IdentifierAssigner,
    entities: HashMap<Tag, TrackedEntity>,
    live: BTreeSet<Tag>,
    kinds: HashMap<(SideId, UnitTypeId), EntityKind>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, frame: &FrameObservation) -> FrameReport {
        let frame_index = frame.frame_index;
        let mut report = FrameReport {
            frame_index,
            ..FrameReport::default()
        };

        let mut seen = HashSet::new();
        let mut accepted = Vec::<(SideId, EntityRecord)>::new();
        let mut rejected = BTreeSet::<Tag>::new();
        for (side, snapshot) in &frame.sides {
            for raw in &snapshot.entities {
                match self.accept(*side, raw, &mut seen) {
                    Ok(record) => accepted.push((*side, record)),
                    Err(reason) => {
                        report.dropped_records += 1;
                        rejected.extend(raw.tag);
                        warn!(
                            frame = frame_index,
                            side = %side,
                            tag = ?raw.tag,
                            reason = %reason,
                            "malformed_record_dropped"
                        );
                    }
                }
            }
        }

        // An explicit death report ends a live entity even if a record for it
        // is still present.
        let reported_dead: HashSet<Tag> = frame.dead_tags.iter().copied().collect();
        accepted.retain(|(_, record)| {
            !(reported_dead.contains(&record.tag) && self.live.contains(&record.tag))
        });
        accepted.sort_by_key(|(side, record)| (*side, record.tag));
        let present: BTreeSet<Tag> = accepted.iter().map(|(_, record)| record.tag).collect();

        // A live tag that only sent malformed records is still in the frame.
        // It keeps its state and slot; only absence or a death report ends it.
        let held: BTreeSet<Tag> = rejected
            .into_iter()
            .filter(|tag| {
                self.live.contains(tag) && !present.contains(tag) && !reported_dead.contains(tag)
            })
            .collect();
        for tag in &held {
            if let Some(entity) = self.entities.get(tag) {
                debug!(
                    frame = frame_index,
                    id = %entity.assigned_id,
                    "entity_held_without_record"
                );
                report.held.push(entity.assigned_id);
            }
        }

        let ending: Vec<Tag> = self
            .live
            .iter()
            .filter(|tag| !present.contains(tag) && !held.contains(tag))
            .copied()
            .collect();
        for tag in ending {
            self.terminate(tag, frame_index, &mut report);
        }
        for (side, record) in accepted {
            self.advance(side, record, frame_index, &mut report);
        }
        self.live = present.union(&held).copied().collect();

        report
            .entities
            .sort_by_key(|entity| (entity.id, entity.is_live(), entity.tag));
        report
    }

    fn accept(
        &mut self,
        side: SideId,
        raw: &RawEntityRecord,
        seen: &mut HashSet<Tag>,
    ) -> Result<EntityRecord, MalformedRecord> {
        let record = raw.validate()?;
        if !seen.insert(record.tag) {
            return Err(MalformedRecord::DuplicateTag { tag: record.tag });
        }
        if let Some(existing) = self.entities.get(&record.tag) {
            if existing.is_terminal() {
                return Err(MalformedRecord::ReappearedAfterTerminal { tag: record.tag });
            }
            return Ok(record);
        }
        let kind = EntityKind::of(record.is_structure);
        let expected = *self.kinds.entry((side, record.type_id)).or_insert(kind);
        if expected != kind {
            return Err(MalformedRecord::KindConflict {
                type_id: record.type_id,
                expected: expected.label(),
                actual: kind.label(),
            });
        }
        Ok(record)
    }

    fn terminate(&mut self, tag: Tag, frame_index: FrameIndex, report: &mut FrameReport) {
        let Some(entity) = self.entities.get_mut(&tag) else {
            return;
        };
        entity.current_state = if !entity.is_structure {
            LifecycleState::Killed
        } else if entity.completed_frame.is_some() {
            LifecycleState::Destroyed
        } else {
            LifecycleState::Cancelled
        };
        entity.destroyed_frame = Some(frame_index);
        self.assigner.release(tag, frame_index);
        debug!(
            frame = frame_index,
            id = %entity.assigned_id,
            state = entity.current_state.as_str(),
            "entity_terminal"
        );
        report.entities.push(EntityFrameState::of(entity, None));
    }

    fn advance(
        &mut self,
        side: SideId,
        record: EntityRecord,
        frame_index: FrameIndex,
        report: &mut FrameReport,
    ) {
        match self.entities.get_mut(&record.tag) {
            Some(entity) => {
                entity.current_state = if !entity.is_structure {
                    LifecycleState::Existing
                } else if entity.completed_frame.is_some() {
                    LifecycleState::Completed
                } else if record.build_progress >= 1.0 {
                    entity.completed_frame = Some(frame_index);
                    LifecycleState::Completed
                } else {
                    LifecycleState::Building
                };
                report.entities.push(EntityFrameState::of(entity, Some(record)));
            }
            None => {
                let kind = EntityKind::of(record.is_structure);
                let assigned_id =
                    self.assigner
                        .assign(record.tag, record.type_id, kind, side, frame_index);
                let serial = self.assigner.serial(record.tag).unwrap_or_default();
                let (current_state, completed_frame) = match kind {
                    EntityKind::Unit => (LifecycleState::Built, None),
                    EntityKind::Structure if record.build_progress >= 1.0 => {
                        (LifecycleState::Completed, Some(frame_index))
                    }
                    EntityKind::Structure => (LifecycleState::Started, None),
                };
                let entity = TrackedEntity {
                    tag: record.tag,
                    assigned_id,
                    serial,
                    side,
                    type_id: record.type_id,
                    is_structure: record.is_structure,
                    first_seen_frame: frame_index,
                    completed_frame,
                    destroyed_frame: None,
                    current_state,
                };
                debug!(
                    frame = frame_index,
                    id = %assigned_id,
                    tag = %record.tag,
                    "entity_first_seen"
                );
                report.entities.push(EntityFrameState::of(&entity, Some(record)));
                self.entities.insert(record.tag, entity);
            }
        }
    }

    pub fn entity(&self, tag: Tag) -> Option<&TrackedEntity> {
        self.entities.get(&tag)
    }

    pub fn assigner(&self) -> &IdentifierAssigner {
        &self.assigner
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Every entity seen so far, ordered by first sighting.
    pub fn into_ledger(self) -> Vec<TrackedEntity> {
        let mut ledger: Vec<TrackedEntity> = self.entities.into_values().collect();
        ledger.sort_by_key(|entity| (entity.first_seen_frame, entity.side, entity.tag));
        ledger
    }

    pub fn reset(&mut self) {
        self.assigner.reset();
        self.entities.clear();
        self.live.clear();
        self.kinds.clear();
    }
}
