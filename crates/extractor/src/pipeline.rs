use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::rows::{build_rows, MessageEvent, Row, SamplingCadence};
use crate::schema::{discover_schema, Schema, SchemaConsistencyError};
use crate::sink::SinkError;
use crate::source::{FrameSequenceGuard, JobRef, SimulationSession, SourceError};
use crate::tracking::TrackedEntity;

pub const DEFAULT_FRAMES_PER_SECOND: f64 = 22.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    pub cadence: SamplingCadence,
    pub frames_per_second: f64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            cadence: SamplingCadence::default(),
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
        }
    }
}

/// Shared cancellation flag, checked at frame boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    SchemaConsistency(#[from] SchemaConsistencyError),
    #[error("failed to write outputs after {attempts} attempt(s): {source}")]
    Sink {
        attempts: u32,
        #[source]
        source: SinkError,
    },
    #[error("failed to start simulation session: {source}")]
    SessionStart {
        #[source]
        source: SourceError,
    },
    #[error("job cancelled before completion")]
    Cancelled,
    #[error("job panicked: {message}")]
    Panicked { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Source,
    SchemaConsistency,
    Sink,
    Session,
    Cancelled,
    Panicked,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::SchemaConsistency => "schema_consistency",
            Self::Sink => "sink",
            Self::Session => "session",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable, serializable view of a [`JobError`] kept in batch results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Source(_) => ErrorKind::Source,
            Self::SchemaConsistency(_) => ErrorKind::SchemaConsistency,
            Self::Sink { .. } => ErrorKind::Sink,
            Self::SessionStart { .. } => ErrorKind::Session,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Panicked { .. } => ErrorKind::Panicked,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutput {
    pub schema: Schema,
    pub rows: Vec<Row>,
    pub messages: Vec<MessageEvent>,
    pub entities: Vec<TrackedEntity>,
    pub frame_count: u64,
    pub dropped_records: usize,
}

/// Runs both passes for one job on `session`. Each pass opens its own
/// observation sequence and closes it before returning.
pub fn extract_job<S: SimulationSession + ?Sized>(
    session: &mut S,
    job: &JobRef,
    options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<ExtractionOutput, JobError> {
    let discovery = {
        let mut source = FrameSequenceGuard::new(session.open(job)?);
        discover_schema(&mut source, cancel)?
    };
    info!(
        job = %job,
        columns = discovery.schema.len(),
        frames = discovery.frames.frame_count,
        dropped_records = discovery.dropped_records,
        "schema_discovered"
    );

    let pass = {
        let mut source = FrameSequenceGuard::new(session.open(job)?);
        build_rows(
            &mut source,
            &discovery.schema,
            &discovery.frames,
            options,
            cancel,
        )?
    };
    info!(
        job = %job,
        rows = pass.rows.len(),
        entities = pass.entities.len(),
        messages = pass.messages.len(),
        "rows_extracted"
    );

    Ok(ExtractionOutput {
        schema: discovery.schema,
        rows: pass.rows,
        messages: pass.messages,
        entities: pass.entities,
        frame_count: pass.frames.frame_count,
        dropped_records: discovery.dropped_records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::SideId;
    use crate::source::SessionFactory;
    use crate::test_support::{unit, FrameBuilder, ScriptedFactory};

    const P1: SideId = SideId(1);

    #[test]
    fn extract_job_produces_schema_and_rows() {
        let job = JobRef::new("mem://one", "one");
        let factory = ScriptedFactory::new().with_frames(
            &job,
            vec![
                FrameBuilder::new(0).entity(P1, unit(1, 48)).build(),
                FrameBuilder::new(16)
                    .entity(P1, unit(1, 48))
                    .entity(P1, unit(2, 48))
                    .build(),
            ],
        );
        let mut session = factory.start(0).expect("session");
        let output = extract_job(
            &mut session,
            &job,
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .expect("extract");
        assert_eq!(output.rows.len(), 2);
        assert_eq!(output.frame_count, 2);
        assert_eq!(output.entities.len(), 2);
        assert!(output.schema.column_index("p1_u48_002_x").is_some());
        assert_eq!(factory.opens(), 2);
    }

    #[test]
    fn repeated_extraction_is_identical() {
        let job = JobRef::new("mem://repeat", "repeat");
        let factory = ScriptedFactory::new().with_frames(
            &job,
            vec![
                FrameBuilder::new(0).entity(P1, unit(4, 48)).build(),
                FrameBuilder::new(1).entity(P1, unit(5, 48)).build(),
            ],
        );
        let mut session = factory.start(0).expect("session");
        let options = ExtractOptions::default();
        let cancel = CancelToken::new();
        let first = extract_job(&mut session, &job, &options, &cancel).expect("first");
        let second = extract_job(&mut session, &job, &options, &cancel).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn source_that_changes_between_passes_fails_the_job() {
        let job = JobRef::new("mem://drift", "drift");
        let factory = ScriptedFactory::new()
            .with_frames(&job, vec![FrameBuilder::new(0).side(P1).build()])
            .with_second_pass_extra_frame(&job);
        let mut session = factory.start(0).expect("session");
        let error = extract_job(
            &mut session,
            &job,
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .expect_err("must diverge");
        assert_eq!(error.kind(), ErrorKind::SchemaConsistency);
    }

    #[test]
    fn non_monotonic_frames_fail_with_source_error() {
        let job = JobRef::new("mem://backwards", "backwards");
        let factory = ScriptedFactory::new().with_frames(
            &job,
            vec![
                FrameBuilder::new(5).side(P1).build(),
                FrameBuilder::new(5).side(P1).build(),
            ],
        );
        let mut session = factory.start(0).expect("session");
        let error = extract_job(
            &mut session,
            &job,
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            JobError::Source(SourceError::NonMonotonicFrame { .. })
        ));
        assert_eq!(error.info().kind, ErrorKind::Source);
    }
}
