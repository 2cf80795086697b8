use std::collections::BTreeMap;
use std::fmt;

use crate::observation::{SideId, UnitTypeId};
use crate::pipeline::ExtractionOutput;
use crate::schema::{EntityField, GroupLayout, Schema, Value};
use crate::tracking::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub row: usize,
    pub column: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "row {} column {}: {}", self.row, column, self.message),
            None => write!(f, "row {}: {}", self.row, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub rows_checked: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, row: usize, column: Option<&str>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            row,
            column: column.map(str::to_string),
            message: message.into(),
        });
    }
}

/// Checks the table invariants of one job's output. Every violation is
/// reported; the output itself is never modified.
pub fn validate_output(output: &ExtractionOutput) -> ValidationReport {
    let schema = &output.schema;
    let mut report = ValidationReport {
        rows_checked: output.rows.len(),
        ..ValidationReport::default()
    };
    let mut previous_frame: Option<i64> = None;
    // (side, type, slot) -> (started_frame, progress) of the last row seen.
    let mut progress_by_slot: BTreeMap<(SideId, UnitTypeId, u32), (i64, f64)> = BTreeMap::new();

    for (row_index, row) in output.rows.iter().enumerate() {
        if row.values.len() != schema.len() {
            report.push(
                row_index,
                None,
                format!(
                    "row has {} values, schema has {} columns",
                    row.values.len(),
                    schema.len()
                ),
            );
            continue;
        }

        match row.get(schema.frame_index_column()).as_i64() {
            Some(frame) => {
                if let Some(previous) = previous_frame.filter(|previous| frame <= *previous) {
                    report.push(
                        row_index,
                        Some("frame_index"),
                        format!("frame {frame} does not follow frame {previous}"),
                    );
                }
                previous_frame = Some(frame);
            }
            None => report.push(row_index, Some("frame_index"), "frame index is missing"),
        }

        for (side, layout) in schema.sides() {
            for (type_id, group) in layout.groups() {
                check_count(schema, &mut report, row_index, &row.values, group);
                if group.kind == EntityKind::Structure {
                    check_progress(
                        schema,
                        &mut report,
                        row_index,
                        &row.values,
                        group,
                        (side, type_id),
                        &mut progress_by_slot,
                    );
                }
            }
        }
    }
    report
}

fn column_name(schema: &Schema, column: usize) -> Option<&str> {
    schema.columns().get(column).map(|descriptor| descriptor.name.as_str())
}

fn check_count(
    schema: &Schema,
    report: &mut ValidationReport,
    row_index: usize,
    values: &[Value],
    group: &GroupLayout,
) {
    let occupied = (1..=group.slots)
        .filter_map(|slot| group.column(slot, EntityField::X))
        .filter(|column| !values[*column].is_missing())
        .count() as i64;
    let count = values[group.count_column].as_i64();
    if count != Some(occupied) {
        report.push(
            row_index,
            column_name(schema, group.count_column),
            format!(
                "count {} does not match {occupied} occupied slot(s)",
                count.map_or_else(|| "missing".to_string(), |count| count.to_string())
            ),
        );
    }
}

fn check_progress(
    schema: &Schema,
    report: &mut ValidationReport,
    row_index: usize,
    values: &[Value],
    group: &GroupLayout,
    (side, type_id): (SideId, UnitTypeId),
    progress_by_slot: &mut BTreeMap<(SideId, UnitTypeId, u32), (i64, f64)>,
) {
    for slot in 1..=group.slots {
        let (Some(started_column), Some(progress_column)) = (
            group.column(slot, EntityField::StartedFrame),
            group.column(slot, EntityField::Progress),
        ) else {
            continue;
        };
        let key = (side, type_id, slot);
        let (Some(started), Some(progress)) = (
            values[started_column].as_i64(),
            values[progress_column].as_f64(),
        ) else {
            continue;
        };
        if let Some((previous_started, previous_progress)) = progress_by_slot.get(&key) {
            if *previous_started == started && progress < *previous_progress {
                report.push(
                    row_index,
                    column_name(schema, progress_column),
                    format!("progress fell from {previous_progress} to {progress}"),
                );
            }
        }
        progress_by_slot.insert(key, (started, progress));
    }
}
