use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::types::BatchControl;
use crate::config::{ExtractConfig, RetryPolicy};
use crate::pipeline::{extract_job, ErrorInfo, ExtractOptions, ExtractionOutput, JobError};
use crate::sink::{OutputSink, SinkReceipt};
use crate::source::{JobRef, SessionFactory, SimulationSession};

#[derive(Debug, Clone)]
pub(crate) struct QueuedJob {
    pub index: usize,
    pub job: JobRef,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Claimed {
        index: usize,
        worker: usize,
    },
    Finished {
        index: usize,
        outcome: Result<SinkReceipt, ErrorInfo>,
        elapsed: Duration,
    },
    /// Job dequeued after cancellation; it never ran.
    Skipped {
        index: usize,
        error: ErrorInfo,
    },
}

/// One worker thread. Owns its simulation session and reuses it across jobs
/// until it has served `max_jobs_per_session` jobs or fails to reset.
pub(crate) struct Worker<'a, F: SessionFactory, K: OutputSink + ?Sized> {
    index: usize,
    factory: &'a F,
    sink: &'a K,
    config: &'a ExtractConfig,
    control: &'a BatchControl,
    session: Option<F::Session>,
    jobs_on_session: usize,
}

impl<'a, F: SessionFactory, K: OutputSink + ?Sized> Worker<'a, F, K> {
    pub fn new(
        index: usize,
        factory: &'a F,
        sink: &'a K,
        config: &'a ExtractConfig,
        control: &'a BatchControl,
    ) -> Self {
        Self {
            index,
            factory,
            sink,
            config,
            control,
            session: None,
            jobs_on_session: 0,
        }
    }

    pub fn run(mut self, jobs: Receiver<QueuedJob>, events: Sender<WorkerEvent>) {
        debug!(worker = self.index, "worker_started");
        for queued in jobs.iter() {
            if self.control.is_cancelled() {
                let skipped = WorkerEvent::Skipped {
                    index: queued.index,
                    error: JobError::Cancelled.info(),
                };
                if events.send(skipped).is_err() {
                    break;
                }
                continue;
            }

            let claimed = WorkerEvent::Claimed {
                index: queued.index,
                worker: self.index,
            };
            if events.send(claimed).is_err() {
                break;
            }
            let started = Instant::now();
            let outcome = self.process(&queued.job);
            let elapsed = started.elapsed();
            match &outcome {
                Ok(receipt) => info!(
                    job = %queued.job,
                    worker = self.index,
                    elapsed_ms = elapsed.as_millis() as u64,
                    files = receipt.files.len(),
                    "job_succeeded"
                ),
                Err(failure) => error!(
                    job = %queued.job,
                    worker = self.index,
                    kind = %failure.kind(),
                    error = %failure,
                    "job_failed"
                ),
            }
            let finished = WorkerEvent::Finished {
                index: queued.index,
                outcome: outcome.map_err(|failure| failure.info()),
                elapsed,
            };
            if events.send(finished).is_err() {
                break;
            }
        }
        debug!(worker = self.index, "worker_stopped");
    }

    fn process(&mut self, job: &JobRef) -> Result<SinkReceipt, JobError> {
        let options = self.config.extract_options();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| self.extract_and_write(job, &options)));
        match caught {
            Ok(outcome) => {
                self.finish_session_job();
                outcome
            }
            Err(payload) => {
                self.session = None;
                warn!(worker = self.index, job = %job, "session_discarded_after_panic");
                Err(JobError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            }
        }
    }

    fn extract_and_write(
        &mut self,
        job: &JobRef,
        options: &ExtractOptions,
    ) -> Result<SinkReceipt, JobError> {
        let control = self.control;
        let sink = self.sink;
        let retry = self.config.sink_retry;
        let output = extract_job(self.session()?, job, options, control.token())?;
        write_with_retry(sink, job, &output, &retry, control)
    }

    fn session(&mut self) -> Result<&mut F::Session, JobError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let session = self
                    .factory
                    .start(self.index)
                    .map_err(|source| JobError::SessionStart { source })?;
                info!(worker = self.index, "session_started");
                self.jobs_on_session = 0;
                session
            }
        };
        Ok(self.session.insert(session))
    }

    fn finish_session_job(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        self.jobs_on_session += 1;
        if self.jobs_on_session >= self.config.max_jobs_per_session.max(1) {
            info!(
                worker = self.index,
                jobs = self.jobs_on_session,
                "session_recycled"
            );
            self.session = None;
            return;
        }
        if let Err(reset_error) = session.reset() {
            warn!(
                worker = self.index,
                error = %reset_error,
                "session_reset_failed"
            );
            self.session = None;
        }
    }
}

fn write_with_retry<K: OutputSink + ?Sized>(
    sink: &K,
    job: &JobRef,
    output: &ExtractionOutput,
    policy: &RetryPolicy,
    control: &BatchControl,
) -> Result<SinkReceipt, JobError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        if control.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        attempt += 1;
        match sink.write(job, output) {
            Ok(receipt) => return Ok(receipt),
            Err(source) if attempt >= max_attempts => {
                return Err(JobError::Sink {
                    attempts: attempt,
                    source,
                });
            }
            Err(write_error) => {
                let delay = policy.backoff(attempt - 1);
                warn!(
                    job = %job,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %write_error,
                    "sink_write_retry"
                );
                thread::sleep(delay);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::schema::{Schema, SchemaPlan};
    use crate::test_support::MemorySink;

    fn empty_output() -> ExtractionOutput {
        ExtractionOutput {
            schema: Schema::from_plan(&SchemaPlan::default()),
            rows: Vec::new(),
            messages: Vec::new(),
            entities: Vec::new(),
            frame_count: 0,
            dropped_records: 0,
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn cancelled_batch_never_touches_the_sink() {
        let sink = MemorySink::new();
        let control = BatchControl::new();
        control.cancel();
        let job = JobRef::new("mem://late", "late");
        let error = write_with_retry(&sink, &job, &empty_output(), &quick_retry(), &control)
            .expect_err("cancelled");
        assert!(matches!(error, JobError::Cancelled));
        assert_eq!(sink.attempts(), 0);
        assert!(sink.written().is_empty());
    }

    #[test]
    fn retries_until_the_sink_accepts() {
        let sink = MemorySink::failing_first(1);
        let job = JobRef::new("mem://flaky", "flaky");
        write_with_retry(
            &sink,
            &job,
            &empty_output(),
            &quick_retry(),
            &BatchControl::new(),
        )
        .expect("second attempt succeeds");
        assert_eq!(sink.attempts(), 2);
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&7u8), "non-string panic payload");
    }
}
