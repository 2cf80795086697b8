use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::SinkError;
use crate::observation::SideId;
use crate::schema::{ColumnDescriptor, ColumnKind, EntityField, Schema, ValueType};

pub const OUTPUT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFiles {
    pub schema: String,
    pub rows: String,
    pub messages: String,
    pub entities: String,
}

impl OutputFiles {
    pub fn for_stem(stem: &str) -> Self {
        Self {
            schema: format!("{stem}.schema.json"),
            rows: format!("{stem}.rows.jsonl"),
            messages: format!("{stem}.messages.jsonl"),
            entities: format!("{stem}.entities.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub format_version: u16,
    pub extractor_version: String,
    pub source: PathBuf,
    pub output_stem: String,
    pub schema_fingerprint_sha256_hex: String,
    pub column_count: usize,
    pub row_count: usize,
    pub frame_count: u64,
    pub message_count: usize,
    pub entity_count: usize,
    pub dropped_records: usize,
    pub rows_sha256_hex: String,
    pub files: OutputFiles,
}

pub(crate) fn manifest_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.manifest.json"))
}

pub fn read_manifest(path: &Path) -> Result<OutputManifest, SinkError> {
    let raw = fs::read_to_string(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut deserializer = serde_json::Deserializer::from_str(&raw);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|error| SinkError::Decode {
        path: path.to_path_buf(),
        message: format!("at {}: {}", error.path(), error.inner()),
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct SchemaDocument<'a> {
    pub format_version: u16,
    pub fingerprint_sha256_hex: &'a str,
    pub frames_per_second: f64,
    pub missing_value: &'static str,
    pub columns: Vec<ColumnDocument<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ColumnDocument<'a> {
    pub index: usize,
    pub name: &'a str,
    pub side: Option<SideId>,
    pub kind: &'a ColumnKind,
    pub value_type: ValueType,
    pub description: String,
    pub missing_when: &'static str,
}

impl<'a> SchemaDocument<'a> {
    pub fn new(schema: &'a Schema, frames_per_second: f64) -> Self {
        Self {
            format_version: OUTPUT_FORMAT_VERSION,
            fingerprint_sha256_hex: schema.fingerprint_sha256_hex(),
            frames_per_second,
            missing_value: "null",
            columns: schema
                .columns()
                .iter()
                .enumerate()
                .map(|(index, column)| ColumnDocument::new(index, column))
                .collect(),
        }
    }
}

impl<'a> ColumnDocument<'a> {
    fn new(index: usize, column: &'a ColumnDescriptor) -> Self {
        Self {
            index,
            name: &column.name,
            side: column.side,
            kind: &column.kind,
            value_type: column.value_type,
            description: column.description(),
            missing_when: missing_rule(&column.kind),
        }
    }
}

fn missing_rule(kind: &ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Frame { .. } | ColumnKind::Count { .. } => "never",
        ColumnKind::Economy { .. } | ColumnKind::Research { .. } => {
            "the side is absent from the frame"
        }
        ColumnKind::Entity { field, .. } => match field {
            EntityField::State | EntityField::StartedFrame => "the slot has no occupant",
            EntityField::CompletedFrame => {
                "the slot has no occupant or its structure is not yet completed"
            }
            EntityField::DestroyedFrame => {
                "the slot has no occupant or its occupant is still live"
            }
            EntityField::Shield
            | EntityField::ShieldMax
            | EntityField::Energy
            | EntityField::EnergyMax => {
                "the slot has no live occupant or the occupant does not report the value"
            }
            _ => "the slot has no live occupant (including the occupant's terminal frame)",
        },
    }
}
