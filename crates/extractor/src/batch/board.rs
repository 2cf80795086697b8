use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use super::types::{BatchResult, FailedJob, JobState, JobTiming};
use crate::pipeline::{ErrorInfo, ErrorKind};
use crate::source::JobRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job #{index} is not on the board")]
    UnknownJob { index: usize },
    #[error("job #{index} cannot move from {from} to {to}")]
    Illegal {
        index: usize,
        from: JobState,
        to: JobState,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct JobRecord {
    job: JobRef,
    state: JobState,
    worker: Option<usize>,
    elapsed: Duration,
    error: Option<ErrorInfo>,
}

/// Explicit per-job state: `queued -> running -> {succeeded, failed}`, plus
/// `queued -> failed` for jobs cancelled before a worker claimed them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobBoard {
    jobs_by_index: BTreeMap<usize, JobRecord>,
}

impl JobBoard {
    pub fn new(jobs: &[JobRef]) -> Self {
        let jobs_by_index = jobs
            .iter()
            .enumerate()
            .map(|(index, job)| {
                (
                    index,
                    JobRecord {
                        job: job.clone(),
                        state: JobState::Queued,
                        worker: None,
                        elapsed: Duration::ZERO,
                        error: None,
                    },
                )
            })
            .collect();
        Self { jobs_by_index }
    }

    pub fn len(&self) -> usize {
        self.jobs_by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs_by_index.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<JobState> {
        self.jobs_by_index.get(&index).map(|record| record.state)
    }

    fn transition(
        &mut self,
        index: usize,
        to: JobState,
    ) -> Result<&mut JobRecord, TransitionError> {
        let record = self
            .jobs_by_index
            .get_mut(&index)
            .ok_or(TransitionError::UnknownJob { index })?;
        let legal = matches!(
            (record.state, to),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
                | (JobState::Queued, JobState::Failed)
        );
        if !legal {
            return Err(TransitionError::Illegal {
                index,
                from: record.state,
                to,
            });
        }
        record.state = to;
        Ok(record)
    }

    pub fn mark_running(&mut self, index: usize, worker: usize) -> Result<(), TransitionError> {
        let record = self.transition(index, JobState::Running)?;
        record.worker = Some(worker);
        Ok(())
    }

    pub fn mark_succeeded(
        &mut self,
        index: usize,
        elapsed: Duration,
    ) -> Result<(), TransitionError> {
        let record = self.transition(index, JobState::Succeeded)?;
        record.elapsed = elapsed;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        index: usize,
        error: ErrorInfo,
        elapsed: Duration,
    ) -> Result<(), TransitionError> {
        let record = self.transition(index, JobState::Failed)?;
        record.elapsed = elapsed;
        record.error = Some(error);
        Ok(())
    }

    /// Closes the board. Jobs still queued were never claimed and are
    /// reported as cancelled; jobs still running lost their worker.
    pub fn into_result(self, total_elapsed: Duration) -> BatchResult {
        let mut result = BatchResult {
            total_elapsed,
            ..BatchResult::default()
        };
        for (_, mut record) in self.jobs_by_index {
            match record.state {
                JobState::Succeeded => result.succeeded.push(record.job.clone()),
                JobState::Failed => {
                    let error = record.error.take().unwrap_or_else(|| {
                        ErrorInfo::new(ErrorKind::Cancelled, "job failed without a reported cause")
                    });
                    result.failed.push(FailedJob {
                        job: record.job.clone(),
                        error,
                    });
                }
                JobState::Queued => {
                    record.state = JobState::Failed;
                    result.failed.push(FailedJob {
                        job: record.job.clone(),
                        error: ErrorInfo::new(
                            ErrorKind::Cancelled,
                            "job was never claimed by a worker",
                        ),
                    });
                }
                JobState::Running => {
                    record.state = JobState::Failed;
                    result.failed.push(FailedJob {
                        job: record.job.clone(),
                        error: ErrorInfo::new(
                            ErrorKind::Panicked,
                            "worker exited while the job was running",
                        ),
                    });
                }
            }
            result.timings.push(JobTiming {
                job: record.job,
                state: record.state,
                worker: record.worker,
                elapsed: record.elapsed,
            });
        }
        result
    }
}
