mod atomic_io;
mod manifest;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use manifest::{read_manifest, OutputFiles, OutputManifest, OUTPUT_FORMAT_VERSION};

use crate::hashing::hash_bytes;
use crate::pipeline::{ExtractionOutput, DEFAULT_FRAMES_PER_SECOND};
use crate::source::JobRef;
use atomic_io::{remove_if_present, write_text_atomic};
use manifest::{manifest_path, SchemaDocument};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("sink rejected output for {job}: {reason}")]
    Rejected { job: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkReceipt {
    pub files: Vec<PathBuf>,
    pub rows_sha256_hex: String,
}

pub trait OutputSink: Sync {
    fn write(&self, job: &JobRef, output: &ExtractionOutput) -> Result<SinkReceipt, SinkError>;
}

/// Writes each job's outputs as JSON files under one directory. The manifest
/// is written last; its presence marks a complete output set.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    frames_per_second: f64,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
        }
    }

    pub fn with_frames_per_second(mut self, frames_per_second: f64) -> Self {
        self.frames_per_second = frames_per_second;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, job: &JobRef) -> PathBuf {
        manifest_path(&self.dir, &job.output_stem)
    }
}

impl OutputSink for DirectorySink {
    fn write(&self, job: &JobRef, output: &ExtractionOutput) -> Result<SinkReceipt, SinkError> {
        let stem = job.output_stem.as_str();
        let files = OutputFiles::for_stem(stem);
        let manifest_path = manifest_path(&self.dir, stem);
        remove_if_present(&manifest_path).map_err(|source| SinkError::Io {
            path: manifest_path.clone(),
            source,
        })?;

        let schema_path = self.dir.join(&files.schema);
        let schema_text = encode_pretty(
            &schema_path,
            &SchemaDocument::new(&output.schema, self.frames_per_second),
        )?;
        write_file(&schema_path, &schema_text)?;

        let rows_path = self.dir.join(&files.rows);
        let rows_text = encode_lines(&rows_path, &output.rows)?;
        write_file(&rows_path, &rows_text)?;
        let rows_sha256_hex = hash_bytes(rows_text.as_bytes());

        let messages_path = self.dir.join(&files.messages);
        write_file(&messages_path, &encode_lines(&messages_path, &output.messages)?)?;

        let entities_path = self.dir.join(&files.entities);
        write_file(&entities_path, &encode_lines(&entities_path, &output.entities)?)?;

        let manifest = OutputManifest {
            format_version: OUTPUT_FORMAT_VERSION,
            extractor_version: env!("CARGO_PKG_VERSION").to_string(),
            source: job.source.clone(),
            output_stem: stem.to_string(),
            schema_fingerprint_sha256_hex: output.schema.fingerprint_sha256_hex().to_string(),
            column_count: output.schema.len(),
            row_count: output.rows.len(),
            frame_count: output.frame_count,
            message_count: output.messages.len(),
            entity_count: output.entities.len(),
            dropped_records: output.dropped_records,
            rows_sha256_hex: rows_sha256_hex.clone(),
            files,
        };
        write_file(&manifest_path, &encode_pretty(&manifest_path, &manifest)?)?;
        debug!(job = %job, dir = %self.dir.display(), "outputs_written");

        Ok(SinkReceipt {
            files: vec![
                schema_path,
                rows_path,
                messages_path,
                entities_path,
                manifest_path,
            ],
            rows_sha256_hex,
        })
    }
}

fn write_file(path: &Path, text: &str) -> Result<(), SinkError> {
    write_text_atomic(path, text).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn encode_pretty<T: Serialize>(path: &Path, value: &T) -> Result<String, SinkError> {
    serde_json::to_string_pretty(value).map_err(|error| SinkError::Encode {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

fn encode_lines<T: Serialize>(path: &Path, items: &[T]) -> Result<String, SinkError> {
    let mut text = String::new();
    for item in items {
        let line = serde_json::to_string(item).map_err(|error| SinkError::Encode {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        text.push_str(&line);
        text.push('\n');
    }
    Ok(text)
}
