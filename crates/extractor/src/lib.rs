pub mod batch;
pub mod config;
mod hashing;
pub mod observation;
pub mod pipeline;
pub mod replay_file;
pub mod rows;
pub mod schema;
pub mod sink;
pub mod source;
pub mod tracking;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use batch::{
    resubmit_failed, run_batch, run_batch_with_control, BatchControl, BatchResult, FailedJob,
    JobBoard, JobState, JobTiming, TransitionError,
};
pub use config::{ExtractConfig, RetryPolicy};
pub use hashing::FrameSequenceSummary;
pub use observation::{
    EconomyRecord, EntityRecord, FrameIndex, FrameObservation, MalformedRecord, Position,
    RawEntityRecord, RawVitals, ResearchId, SideId, SideMessage, SideSnapshot, Tag, UnitTypeId,
    Vitals,
};
pub use pipeline::{
    extract_job, CancelToken, ErrorInfo, ErrorKind, ExtractOptions, ExtractionOutput, JobError,
    DEFAULT_FRAMES_PER_SECOND,
};
pub use replay_file::{ReplayFileFactory, ReplayFileSession};
pub use rows::{build_rows, MessageEvent, Row, RowBuilder, RowPass, SamplingCadence};
pub use schema::{
    discover_schema, ColumnDescriptor, ColumnKind, Discovery, Schema, SchemaConsistencyError,
    Value, ValueType,
};
pub use sink::{DirectorySink, OutputManifest, OutputSink, SinkError, SinkReceipt};
pub use source::{
    FrameSequenceGuard, JobRef, ObservationSource, SessionFactory, SimulationSession, SourceError,
};
pub use tracking::{
    AssignedId, EntityKind, IdentifierAssigner, LifecycleState, LifecycleTracker, TrackedEntity,
};
pub use validate::{validate_output, ValidationIssue, ValidationReport};
