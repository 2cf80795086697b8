use std::collections::BTreeMap;
use std::num::{NonZeroU32, NonZeroU64};

use serde::Serialize;
use tracing::debug;

use crate::hashing::{FrameSequenceHasher, FrameSequenceSummary};
use crate::observation::{FrameIndex, FrameObservation, SideId, UnitTypeId};
use crate::pipeline::{CancelToken, ExtractOptions, JobError};
use crate::schema::{EconomyField, EntityField, Schema, SchemaConsistencyError, Value};
use crate::source::ObservationSource;
use crate::tracking::{EntityFrameState, EntityKind, FrameReport, LifecycleTracker, TrackedEntity};

/// Which frames produce rows. Every frame is still fed to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingCadence {
    /// Every n-th frame in sequence order, starting with the first.
    EveryNth(NonZeroU32),
    /// A frame is sampled once at least this many frame indices have passed
    /// since the last sampled frame.
    MinFrameGap(NonZeroU64),
}

impl Default for SamplingCadence {
    fn default() -> Self {
        Self::EveryNth(NonZeroU32::MIN)
    }
}

#[derive(Debug)]
pub(crate) struct Sampler {
    cadence: SamplingCadence,
    ordinal: u64,
    last_sampled: Option<FrameIndex>,
}

impl Sampler {
    pub fn new(cadence: SamplingCadence) -> Self {
        Self {
            cadence,
            ordinal: 0,
            last_sampled: None,
        }
    }

    pub fn select(&mut self, frame_index: FrameIndex) -> bool {
        let ordinal = self.ordinal;
        self.ordinal = self.ordinal.saturating_add(1);
        let selected = match self.cadence {
            SamplingCadence::EveryNth(n) => ordinal % u64::from(n.get()) == 0,
            SamplingCadence::MinFrameGap(gap) => self
                .last_sampled
                .map_or(true, |last| frame_index.saturating_sub(last) >= gap.get()),
        };
        if selected {
            self.last_sampled = Some(frame_index);
        }
        selected
    }
}

/// One table row. `values[i]` belongs to `schema.columns()[i]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: usize) -> Value {
        self.values.get(column).copied().unwrap_or(Value::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    pub frame_index: FrameIndex,
    pub side: SideId,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RowBuilder<'s> {
    schema: &'s Schema,
    frames_per_second: f64,
}

impl<'s> RowBuilder<'s> {
    pub fn new(schema: &'s Schema, frames_per_second: f64) -> Self {
        Self {
            schema,
            frames_per_second,
        }
    }

    pub fn build_row(
        &self,
        frame: &FrameObservation,
        report: &FrameReport,
    ) -> Result<Row, SchemaConsistencyError> {
        let schema = self.schema;
        let frame_index = frame.frame_index;
        let mut values = vec![Value::Missing; schema.len()];
        let frame_value = i64::try_from(frame_index)
            .map_err(|_| SchemaConsistencyError::FrameIndexOutOfRange { frame_index })?;
        values[schema.frame_index_column()] = Value::Int(frame_value);
        values[schema.timestamp_column()] =
            Value::Float(frame_index as f64 / self.frames_per_second);

        for (_, layout) in schema.sides() {
            for (_, group) in layout.groups() {
                values[group.count_column] = Value::Int(0);
            }
        }

        for (side, snapshot) in &frame.sides {
            let layout = schema
                .side(*side)
                .ok_or(SchemaConsistencyError::UnknownSide {
                    side: *side,
                    frame_index,
                })?;
            for field in EconomyField::ALL {
                if let Some(column) = layout.economy_column(field) {
                    values[column] = field.read(&snapshot.economy);
                }
            }
            for research in &snapshot.completed_research {
                if layout.research_column(*research).is_none() {
                    return Err(SchemaConsistencyError::UnknownResearch {
                        side: *side,
                        research: *research,
                        frame_index,
                    });
                }
            }
            for (research, column) in layout.research_columns() {
                values[column] = Value::Bool(snapshot.completed_research.contains(&research));
            }
        }

        // Live occupants first so a slot handed over this frame shows the
        // newcomer rather than its terminal predecessor.
        let mut counts = BTreeMap::<(SideId, UnitTypeId), i64>::new();
        for entity in report.live() {
            self.write_live(entity, frame_index, &mut values)?;
            *counts.entry((entity.id.side, entity.id.type_id)).or_default() += 1;
        }
        for entity in report.terminal() {
            self.write_terminal(entity, frame_index, &mut values)?;
        }
        for ((side, type_id), count) in counts {
            if let Some(group) = schema.group(side, type_id) {
                values[group.count_column] = Value::Int(count);
            }
        }

        Ok(Row { values })
    }

    fn slot_column(
        &self,
        entity: &EntityFrameState,
        field: EntityField,
        frame_index: FrameIndex,
    ) -> Result<Option<usize>, SchemaConsistencyError> {
        let id = entity.id;
        let group = self.schema.group(id.side, id.type_id).ok_or(
            SchemaConsistencyError::UnknownGroup {
                side: id.side,
                type_id: id.type_id,
                frame_index,
            },
        )?;
        if id.slot == 0 || id.slot > group.slots {
            return Err(SchemaConsistencyError::SlotOutOfRange {
                id,
                slots: group.slots,
                frame_index,
            });
        }
        Ok(group.column(id.slot, field))
    }

    fn write_live(
        &self,
        entity: &EntityFrameState,
        frame_index: FrameIndex,
        values: &mut [Value],
    ) -> Result<(), SchemaConsistencyError> {
        let Some(record) = entity.record.as_ref() else {
            return Ok(());
        };
        for field in EntityField::fields_for(entity.id.kind) {
            let value = match field {
                EntityField::X => Value::Float(record.position.x),
                EntityField::Y => Value::Float(record.position.y),
                EntityField::Z => Value::Float(record.position.z),
                EntityField::Health => Value::Float(record.vitals.health),
                EntityField::HealthMax => Value::Float(record.vitals.health_max),
                EntityField::Shield => Value::from_optional(record.vitals.shield),
                EntityField::ShieldMax => Value::from_optional(record.vitals.shield_max),
                EntityField::Energy => Value::from_optional(record.vitals.energy),
                EntityField::EnergyMax => Value::from_optional(record.vitals.energy_max),
                EntityField::Progress => Value::Float(record.build_progress),
                _ => lifecycle_value(entity, *field),
            };
            if let Some(column) = self.slot_column(entity, *field, frame_index)? {
                values[column] = value;
            }
        }
        Ok(())
    }

    fn write_terminal(
        &self,
        entity: &EntityFrameState,
        frame_index: FrameIndex,
        values: &mut [Value],
    ) -> Result<(), SchemaConsistencyError> {
        let Some(state_column) = self.slot_column(entity, EntityField::State, frame_index)? else {
            return Ok(());
        };
        if !values[state_column].is_missing() {
            return Ok(());
        }
        for field in EntityField::fields_for(entity.id.kind) {
            if !field.is_lifecycle() {
                continue;
            }
            if let Some(column) = self.slot_column(entity, *field, frame_index)? {
                values[column] = lifecycle_value(entity, *field);
            }
        }
        Ok(())
    }
}

fn lifecycle_value(entity: &EntityFrameState, field: EntityField) -> Value {
    // Lifecycle frames never exceed the row's own frame index, which
    // build_row has already checked.
    match field {
        EntityField::State => Value::Text(entity.state.as_str()),
        EntityField::StartedFrame if entity.id.kind == EntityKind::Structure => {
            frame_cell(Some(entity.first_seen_frame))
        }
        EntityField::CompletedFrame => frame_cell(entity.completed_frame),
        EntityField::DestroyedFrame => frame_cell(entity.destroyed_frame),
        _ => Value::Missing,
    }
}

fn frame_cell(frame: Option<FrameIndex>) -> Value {
    frame
        .and_then(|frame| i64::try_from(frame).ok())
        .map_or(Value::Missing, Value::Int)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowPass {
    pub rows: Vec<Row>,
    pub messages: Vec<MessageEvent>,
    pub entities: Vec<TrackedEntity>,
    pub frames: FrameSequenceSummary,
}

/// Second pass: replays the same frames against a fixed schema. The frame
/// sequence must match what discovery saw.
pub fn build_rows(
    source: &mut dyn ObservationSource,
    schema: &Schema,
    expected: &FrameSequenceSummary,
    options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<RowPass, JobError> {
    let builder = RowBuilder::new(schema, options.frames_per_second);
    let mut sampler = Sampler::new(options.cadence);
    let mut tracker = LifecycleTracker::new();
    let mut frames = FrameSequenceHasher::new();
    let mut rows = Vec::new();
    let mut messages = Vec::new();

    while let Some(frame) = source.advance()? {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        frames.push(frame.frame_index);
        if frames.frame_count() > expected.frame_count {
            return Err(diverged(expected, frames.finish()).into());
        }

        let report = tracker.observe(&frame);
        messages.extend(frame.messages.iter().map(|message| MessageEvent {
            frame_index: frame.frame_index,
            side: message.side,
            text: message.text.clone(),
        }));
        if sampler.select(frame.frame_index) {
            rows.push(builder.build_row(&frame, &report)?);
        }
    }

    let frames = frames.finish();
    if frames != *expected {
        return Err(diverged(expected, frames).into());
    }
    debug!(
        rows = rows.len(),
        messages = messages.len(),
        frames = frames.frame_count,
        "rows_built"
    );
    Ok(RowPass {
        rows,
        messages,
        entities: tracker.into_ledger(),
        frames,
    })
}

fn diverged(expected: &FrameSequenceSummary, actual: FrameSequenceSummary) -> SchemaConsistencyError {
    SchemaConsistencyError::FrameSequenceDiverged {
        expected_frames: expected.frame_count,
        actual_frames: actual.frame_count,
        expected_sha256_hex: expected.fingerprint_sha256_hex.clone(),
        actual_sha256_hex: actual.fingerprint_sha256_hex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{EconomyRecord, SideId, Tag};
    use crate::schema::discover_schema;
    use crate::test_support::{structure, unit, FrameBuilder, VecSource};

    const P1: SideId = SideId(1);

    fn run(frames: Vec<FrameObservation>, cadence: SamplingCadence) -> (Schema, RowPass) {
        let cancel = CancelToken::new();
        let discovery =
            discover_schema(&mut VecSource::new(frames.clone()), &cancel).expect("discover");
        let options = ExtractOptions {
            cadence,
            ..ExtractOptions::default()
        };
        let pass = build_rows(
            &mut VecSource::new(frames),
            &discovery.schema,
            &discovery.frames,
            &options,
            &cancel,
        )
        .expect("build rows");
        (discovery.schema, pass)
    }

    fn cell(schema: &Schema, row: &Row, name: &str) -> Value {
        let column = schema.column_index(name).expect(name);
        row.get(column)
    }

    #[test]
    fn sampler_every_nth_counts_frames_not_indices() {
        let mut sampler = Sampler::new(SamplingCadence::EveryNth(
            NonZeroU32::new(2).expect("nonzero"),
        ));
        let picked: Vec<bool> = [0, 5, 6, 40, 41].iter().map(|f| sampler.select(*f)).collect();
        assert_eq!(picked, vec![true, false, true, false, true]);
    }

    #[test]
    fn sampler_min_gap_measures_frame_indices() {
        let mut sampler = Sampler::new(SamplingCadence::MinFrameGap(
            NonZeroU64::new(10).expect("nonzero"),
        ));
        let picked: Vec<bool> = [0, 4, 10, 15, 30].iter().map(|f| sampler.select(*f)).collect();
        assert_eq!(picked, vec![true, false, true, false, true]);
    }

    #[test]
    fn rows_have_schema_width_and_base_columns() {
        let frames = vec![
            FrameBuilder::new(0).entity(P1, unit(1, 48)).build(),
            FrameBuilder::new(224).entity(P1, unit(1, 48)).build(),
        ];
        let (schema, pass) = run(frames, SamplingCadence::default());
        assert_eq!(pass.rows.len(), 2);
        for row in &pass.rows {
            assert_eq!(row.values.len(), schema.len());
        }
        assert_eq!(cell(&schema, &pass.rows[1], "frame_index"), Value::Int(224));
        let seconds = cell(&schema, &pass.rows[1], "timestamp_seconds")
            .as_f64()
            .expect("timestamp");
        assert!((seconds - 10.0).abs() < 1e-9);
    }

    #[test]
    fn killed_unit_shows_only_state_and_is_not_counted() {
        let frames = vec![
            FrameBuilder::new(0)
                .entity(P1, unit(1, 48))
                .entity(P1, unit(2, 48))
                .build(),
            FrameBuilder::new(1).entity(P1, unit(2, 48)).build(),
            FrameBuilder::new(2).entity(P1, unit(2, 48)).build(),
        ];
        let (schema, pass) = run(frames, SamplingCadence::default());
        let terminal = &pass.rows[1];
        assert_eq!(cell(&schema, terminal, "p1_u48_001_state"), Value::Text("killed"));
        assert_eq!(cell(&schema, terminal, "p1_u48_001_x"), Value::Missing);
        assert_eq!(cell(&schema, terminal, "p1_count_u48"), Value::Int(1));
        assert_eq!(cell(&schema, terminal, "p1_u48_002_state"), Value::Text("existing"));

        let after = &pass.rows[2];
        assert_eq!(cell(&schema, after, "p1_u48_001_state"), Value::Missing);
        assert_eq!(cell(&schema, after, "p1_count_u48"), Value::Int(1));
    }

    #[test]
    fn structure_lifecycle_columns() {
        let frames = vec![
            FrameBuilder::new(0).entity(P1, structure(5, 21, 0.5)).build(),
            FrameBuilder::new(8).entity(P1, structure(5, 21, 1.0)).build(),
            FrameBuilder::new(16).side(P1).build(),
        ];
        let (schema, pass) = run(frames, SamplingCadence::default());
        let building = &pass.rows[0];
        assert_eq!(cell(&schema, building, "p1_s21_001_state"), Value::Text("started"));
        assert_eq!(cell(&schema, building, "p1_s21_001_progress"), Value::Float(0.5));
        assert_eq!(cell(&schema, building, "p1_s21_001_started_frame"), Value::Int(0));
        assert_eq!(cell(&schema, building, "p1_s21_001_completed_frame"), Value::Missing);

        let done = &pass.rows[1];
        assert_eq!(cell(&schema, done, "p1_s21_001_completed_frame"), Value::Int(8));

        let gone = &pass.rows[2];
        assert_eq!(cell(&schema, gone, "p1_s21_001_state"), Value::Text("destroyed"));
        assert_eq!(cell(&schema, gone, "p1_s21_001_destroyed_frame"), Value::Int(16));
        assert_eq!(cell(&schema, gone, "p1_s21_001_progress"), Value::Missing);
        assert_eq!(cell(&schema, gone, "p1_count_s21"), Value::Int(0));
    }

    #[test]
    fn same_frame_replacement_shows_newcomer() {
        let frames = vec![
            FrameBuilder::new(0).entity(P1, unit(1, 48)).build(),
            FrameBuilder::new(1).entity(P1, unit(2, 48)).build(),
        ];
        let (schema, pass) = run(frames, SamplingCadence::default());
        assert_eq!(schema.group(P1, UnitTypeId(48)).map(|g| g.slots), Some(1));
        assert_eq!(
            cell(&schema, &pass.rows[1], "p1_u48_001_state"),
            Value::Text("built")
        );
        let ledger: Vec<Tag> = pass.entities.iter().map(|entity| entity.tag).collect();
        assert_eq!(ledger, vec![Tag(1), Tag(2)]);
    }

    #[test]
    fn economy_research_and_messages_are_recorded() {
        let economy = EconomyRecord {
            minerals: 350,
            collection_rate_minerals: 812.5,
            ..EconomyRecord::default()
        };
        let frames = vec![
            FrameBuilder::new(0)
                .economy(P1, economy)
                .message(P1, "glhf")
                .build(),
            FrameBuilder::new(1).side(P1).message(P1, "skipped row").build(),
            FrameBuilder::new(2).research(P1, 7).build(),
        ];
        let two = NonZeroU32::new(2).expect("nonzero");
        let (schema, pass) = run(frames, SamplingCadence::EveryNth(two));
        assert_eq!(pass.rows.len(), 2);
        assert_eq!(cell(&schema, &pass.rows[0], "p1_economy_minerals"), Value::Int(350));
        assert_eq!(
            cell(&schema, &pass.rows[0], "p1_economy_collection_rate_minerals"),
            Value::Float(812.5)
        );
        assert_eq!(cell(&schema, &pass.rows[0], "p1_research_0007"), Value::Bool(false));
        assert_eq!(cell(&schema, &pass.rows[1], "p1_research_0007"), Value::Bool(true));
        assert_eq!(pass.messages.len(), 2);
        assert_eq!(pass.messages[1].frame_index, 1);
    }

    #[test]
    fn side_absent_from_frame_leaves_its_columns_missing() {
        let frames = vec![
            FrameBuilder::new(0).side(P1).side(SideId(2)).build(),
            FrameBuilder::new(1).side(P1).build(),
        ];
        let (schema, pass) = run(frames, SamplingCadence::default());
        assert_eq!(cell(&schema, &pass.rows[1], "p2_economy_minerals"), Value::Missing);
        assert_eq!(cell(&schema, &pass.rows[1], "p1_economy_minerals"), Value::Int(0));
    }

    #[test]
    fn diverging_second_pass_is_a_consistency_error() {
        let cancel = CancelToken::new();
        let first = vec![FrameBuilder::new(0).side(P1).build()];
        let discovery =
            discover_schema(&mut VecSource::new(first), &cancel).expect("discover");
        let second = vec![
            FrameBuilder::new(0).side(P1).build(),
            FrameBuilder::new(1).side(P1).build(),
        ];
        let error = build_rows(
            &mut VecSource::new(second),
            &discovery.schema,
            &discovery.frames,
            &ExtractOptions::default(),
            &cancel,
        )
        .expect_err("divergence");
        assert!(matches!(
            error,
            JobError::SchemaConsistency(SchemaConsistencyError::FrameSequenceDiverged { .. })
        ));
    }

    #[test]
    fn entity_beyond_discovered_width_is_rejected() {
        let cancel = CancelToken::new();
        let narrow = vec![FrameBuilder::new(0).entity(P1, unit(1, 48)).build()];
        let discovery =
            discover_schema(&mut VecSource::new(narrow), &cancel).expect("discover");
        let wide = FrameBuilder::new(0)
            .entity(P1, unit(1, 48))
            .entity(P1, unit(2, 48))
            .build();
        let mut tracker = LifecycleTracker::new();
        let report = tracker.observe(&wide);
        let error = RowBuilder::new(&discovery.schema, 22.4)
            .build_row(&wide, &report)
            .expect_err("too wide");
        assert!(matches!(error, SchemaConsistencyError::SlotOutOfRange { slots: 1, .. }));
    }

    #[test]
    fn held_entity_leaves_a_gap_then_resumes_in_its_slot() {
        let mut garbled = unit(1, 48);
        garbled.vitals.health = None;
        let frames = vec![
            FrameBuilder::new(0).entity(P1, unit(1, 48)).build(),
            FrameBuilder::new(1).entity(P1, garbled).build(),
            FrameBuilder::new(2).entity(P1, unit(1, 48)).build(),
        ];
        let (schema, pass) = run(frames, SamplingCadence::default());
        assert_eq!(schema.group(P1, UnitTypeId(48)).map(|g| g.slots), Some(1));

        let gap = &pass.rows[1];
        assert_eq!(cell(&schema, gap, "p1_u48_001_x"), Value::Missing);
        assert_eq!(cell(&schema, gap, "p1_u48_001_state"), Value::Missing);
        assert_eq!(cell(&schema, gap, "p1_count_u48"), Value::Int(0));

        let resumed = &pass.rows[2];
        assert_eq!(
            cell(&schema, resumed, "p1_u48_001_state"),
            Value::Text("existing")
        );
        assert_eq!(cell(&schema, resumed, "p1_count_u48"), Value::Int(1));
        assert_eq!(pass.entities.len(), 1);
        assert_eq!(pass.entities[0].destroyed_frame, None);
    }

    #[test]
    fn frame_index_beyond_i64_is_rejected() {
        let discovery = discover_schema(
            &mut VecSource::new(vec![FrameBuilder::new(0).side(P1).build()]),
            &CancelToken::new(),
        )
        .expect("discover");
        let frame = FrameBuilder::new(u64::MAX).side(P1).build();
        let error = RowBuilder::new(&discovery.schema, 22.4)
            .build_row(&frame, &FrameReport::default())
            .expect_err("out of range");
        assert!(matches!(
            error,
            SchemaConsistencyError::FrameIndexOutOfRange { frame_index: u64::MAX }
        ));
    }
}
