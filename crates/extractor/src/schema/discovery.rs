use tracing::debug;

use super::{GroupPlan, Schema, SchemaPlan};
use crate::hashing::{FrameSequenceHasher, FrameSequenceSummary};
use crate::pipeline::{CancelToken, JobError};
use crate::source::ObservationSource;
use crate::tracking::LifecycleTracker;

#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub schema: Schema,
    pub plan: SchemaPlan,
    pub frames: FrameSequenceSummary,
    pub dropped_records: usize,
}

/// Reads every frame once and sizes the table: one column group per
/// `(side, type)` with as many slots as that type ever had live at once.
pub fn discover_schema(
    source: &mut dyn ObservationSource,
    cancel: &CancelToken,
) -> Result<Discovery, JobError> {
    let mut tracker = LifecycleTracker::new();
    let mut plan = SchemaPlan::default();
    let mut frames = FrameSequenceHasher::new();
    let mut dropped_records = 0usize;

    while let Some(frame) = source.advance()? {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        frames.push(frame.frame_index);

        for (side, snapshot) in &frame.sides {
            plan.sides
                .entry(*side)
                .or_default()
                .research
                .extend(snapshot.completed_research.iter().copied());
        }

        let report = tracker.observe(&frame);
        dropped_records += report.dropped_records;
        for ((side, type_id), (kind, occupied)) in report.occupied_counts() {
            let group = plan
                .sides
                .entry(side)
                .or_default()
                .groups
                .entry(type_id)
                .or_insert(GroupPlan { kind, peak: 0 });
            group.peak = group.peak.max(occupied);
        }
    }

    debug!(
        frames = frames.frame_count(),
        sides = plan.sides.len(),
        live_at_end = tracker.live_count(),
        "schema_plan_ready"
    );
    Ok(Discovery {
        schema: Schema::from_plan(&plan),
        plan,
        frames: frames.finish(),
        dropped_records,
    })
}
