use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observation::{FrameIndex, FrameObservation};

/// One replay to extract: where its observations come from and the file
/// stem its outputs are written under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub source: PathBuf,
    pub output_stem: String,
}

impl JobRef {
    pub fn new(source: impl Into<PathBuf>, output_stem: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            output_stem: output_stem.into(),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("replay")
            .to_string();
        Self::new(path, stem)
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.display())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open observation source {job}: {reason}")]
    Open { job: String, reason: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("frame index went from {previous} to {next}; frames must strictly increase")]
    NonMonotonicFrame {
        previous: FrameIndex,
        next: FrameIndex,
    },
    #[error("observation source terminated abnormally: {reason}")]
    Terminated { reason: String },
    #[error("simulation session failure: {reason}")]
    Session { reason: String },
}

pub trait ObservationSource {
    /// Returns the next frame, or `None` once the sequence has ended.
    fn advance(&mut self) -> Result<Option<FrameObservation>, SourceError>;
}

impl<T: ObservationSource + ?Sized> ObservationSource for Box<T> {
    fn advance(&mut self) -> Result<Option<FrameObservation>, SourceError> {
        (**self).advance()
    }
}

/// A long-lived simulation handle owned by one worker. Each `open` starts a
/// fresh observation sequence for a job; dropping the returned source closes
/// it.
pub trait SimulationSession {
    fn open<'a>(
        &'a mut self,
        job: &JobRef,
    ) -> Result<Box<dyn ObservationSource + 'a>, SourceError>;

    fn reset(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

pub trait SessionFactory: Sync {
    type Session: SimulationSession;

    fn start(&self, worker_index: usize) -> Result<Self::Session, SourceError>;
}

/// Rejects frame sequences whose indices do not strictly increase.
#[derive(Debug)]
pub struct FrameSequenceGuard<S> {
    inner: S,
    last: Option<FrameIndex>,
}

impl<S: ObservationSource> FrameSequenceGuard<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, last: None }
    }
}

impl<S: ObservationSource> ObservationSource for FrameSequenceGuard<S> {
    fn advance(&mut self) -> Result<Option<FrameObservation>, SourceError> {
        let Some(frame) = self.inner.advance()? else {
            return Ok(None);
        };
        if let Some(previous) = self.last {
            if frame.frame_index <= previous {
                return Err(SourceError::NonMonotonicFrame {
                    previous,
                    next: frame.frame_index,
                });
            }
        }
        self.last = Some(frame.frame_index);
        Ok(Some(frame))
    }
}
