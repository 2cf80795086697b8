use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::pipeline::{CancelToken, ErrorInfo};
use crate::source::JobRef;

const FAILURES_LISTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub job: JobRef,
    pub error: ErrorInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTiming {
    pub job: JobRef,
    pub state: JobState,
    /// Worker that ran the job; `None` if it was never claimed.
    pub worker: Option<usize>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub succeeded: Vec<JobRef>,
    pub failed: Vec<FailedJob>,
    pub timings: Vec<JobTiming>,
    pub total_elapsed: Duration,
}

impl BatchResult {
    pub fn failed_jobs(&self) -> Vec<JobRef> {
        self.failed.iter().map(|failed| failed.job.clone()).collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn job_count(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Mean wall time of the jobs a worker actually ran.
    pub fn average_job_time(&self) -> Option<Duration> {
        let ran: Vec<Duration> = self
            .timings
            .iter()
            .filter(|timing| timing.worker.is_some())
            .map(|timing| timing.elapsed)
            .collect();
        let count = u32::try_from(ran.len()).ok().filter(|count| *count > 0)?;
        Some(ran.iter().sum::<Duration>() / count)
    }

    pub fn render_human_readable(&self) -> String {
        let mut output = format!(
            "jobs={} succeeded={} failed={} total_elapsed_ms={} average_job_ms={}",
            self.job_count(),
            self.succeeded_count(),
            self.failed_count(),
            self.total_elapsed.as_millis(),
            self.average_job_time()
                .map_or_else(|| "n/a".to_string(), |avg| avg.as_millis().to_string())
        );
        for failed in self.failed.iter().take(FAILURES_LISTED) {
            output.push('\n');
            output.push_str(&format!(
                "failed job={} kind={} error={}",
                failed.job, failed.error.kind, failed.error.message
            ));
        }
        if self.failed.len() > FAILURES_LISTED {
            output.push('\n');
            output.push_str(&format!(
                "... and {} more failed job(s)",
                self.failed.len() - FAILURES_LISTED
            ));
        }
        output
    }
}

/// Handle for stopping a running batch from another thread.
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    token: CancelToken,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}
