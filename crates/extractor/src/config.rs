use std::num::NonZeroU32;
use std::time::Duration;

use crate::pipeline::{ExtractOptions, DEFAULT_FRAMES_PER_SECOND};
use crate::rows::SamplingCadence;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_MAX_JOBS_PER_SESSION: usize = 25;
pub const DEFAULT_SINK_ATTEMPTS: u32 = 3;
pub const DEFAULT_SINK_BACKOFF_MS: u64 = 200;
const MAX_SINK_BACKOFF_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SINK_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_SINK_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_SINK_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.min(8);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractConfig {
    pub cadence: SamplingCadence,
    pub frames_per_second: f64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_jobs_per_session: usize,
    pub sink_retry: RetryPolicy,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            cadence: SamplingCadence::EveryNth(NonZeroU32::MIN),
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_jobs_per_session: DEFAULT_MAX_JOBS_PER_SESSION,
            sink_retry: RetryPolicy::default(),
        }
    }
}

impl ExtractConfig {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            cadence: self.cadence,
            frames_per_second: self.frames_per_second,
        }
    }

    /// Workers actually spawned for a batch of `job_count` jobs.
    pub fn effective_workers(&self, job_count: usize) -> usize {
        self.worker_count.max(1).min(job_count.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }

    #[test]
    fn workers_never_exceed_jobs_or_drop_to_zero() {
        let config = ExtractConfig {
            worker_count: 8,
            ..ExtractConfig::default()
        };
        assert_eq!(config.effective_workers(3), 3);
        assert_eq!(config.effective_workers(0), 1);
        let config = ExtractConfig {
            worker_count: 0,
            ..ExtractConfig::default()
        };
        assert_eq!(config.effective_workers(10), 1);
    }
}
