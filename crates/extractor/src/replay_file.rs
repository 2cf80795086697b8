use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;

use tracing::warn;

use crate::observation::FrameObservation;
use crate::source::{JobRef, ObservationSource, SessionFactory, SimulationSession, SourceError};

/// Reads observations from JSON-lines files: one [`FrameObservation`] per
/// line, blank lines ignored.
#[derive(Debug, Default)]
pub struct ReplayFileSession {
    sources_opened: u64,
}

impl ReplayFileSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources_opened(&self) -> u64 {
        self.sources_opened
    }
}

impl SimulationSession for ReplayFileSession {
    fn open<'a>(
        &'a mut self,
        job: &JobRef,
    ) -> Result<Box<dyn ObservationSource + 'a>, SourceError> {
        let file = File::open(&job.source).map_err(|source| SourceError::Io {
            path: job.source.clone(),
            source,
        })?;
        self.sources_opened = self.sources_opened.saturating_add(1);
        Ok(Box::new(ReplayFileSource {
            path: job.source.clone(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
            malformed_frames: 0,
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayFileFactory;

impl SessionFactory for ReplayFileFactory {
    type Session = ReplayFileSession;

    fn start(&self, _worker_index: usize) -> Result<Self::Session, SourceError> {
        Ok(ReplayFileSession::new())
    }
}

struct ReplayFileSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
    malformed_frames: usize,
}

impl ObservationSource for ReplayFileSource {
    fn advance(&mut self) -> Result<Option<FrameObservation>, SourceError> {
        loop {
            let Some(line) = self.lines.next() else {
                if self.malformed_frames > 0 {
                    warn!(
                        path = %self.path.display(),
                        malformed_frames = self.malformed_frames,
                        "replay_file_finished_with_skipped_frames"
                    );
                }
                return Ok(None);
            };
            let line = line.map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let mut deserializer = serde_json::Deserializer::from_str(&line);
            match serde_path_to_error::deserialize::<_, FrameObservation>(&mut deserializer) {
                Ok(frame) => return Ok(Some(frame)),
                Err(error) => {
                    self.malformed_frames += 1;
                    warn!(
                        path = %self.path.display(),
                        line = self.line_number,
                        json_path = %error.path(),
                        error = %error.inner(),
                        "malformed_frame_skipped"
                    );
                }
            }
        }
    }
}
