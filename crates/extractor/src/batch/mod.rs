mod board;
mod types;
mod worker;

use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded};
use tracing::{error, info, warn};

pub use board::{JobBoard, TransitionError};
pub use types::{BatchControl, BatchResult, FailedJob, JobState, JobTiming};

use crate::config::ExtractConfig;
use crate::sink::OutputSink;
use crate::source::{JobRef, SessionFactory};
use worker::{QueuedJob, Worker, WorkerEvent};

pub fn run_batch<F, K>(jobs: Vec<JobRef>, config: &ExtractConfig, factory: &F, sink: &K) -> BatchResult
where
    F: SessionFactory,
    K: OutputSink + ?Sized,
{
    run_batch_with_control(jobs, config, factory, sink, &BatchControl::new())
}

/// Runs every job on a pool of worker threads fed through a bounded queue.
/// Job failures are recorded and never abort the batch.
pub fn run_batch_with_control<F, K>(
    jobs: Vec<JobRef>,
    config: &ExtractConfig,
    factory: &F,
    sink: &K,
    control: &BatchControl,
) -> BatchResult
where
    F: SessionFactory,
    K: OutputSink + ?Sized,
{
    let started = Instant::now();
    let mut board = JobBoard::new(&jobs);
    if jobs.is_empty() {
        return board.into_result(started.elapsed());
    }

    let worker_count = config.effective_workers(jobs.len());
    info!(
        jobs = jobs.len(),
        workers = worker_count,
        queue_capacity = config.queue_capacity.max(1),
        "batch_started"
    );

    let (job_tx, job_rx) = bounded::<QueuedJob>(config.queue_capacity.max(1));
    let (event_tx, event_rx) = unbounded::<WorkerEvent>();

    thread::scope(|scope| {
        for worker_index in 0..worker_count {
            let jobs = job_rx.clone();
            let events = event_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("extract-worker-{worker_index}"))
                .spawn_scoped(scope, move || {
                    Worker::new(worker_index, factory, sink, config, control).run(jobs, events);
                });
            if let Err(spawn_error) = spawned {
                error!(worker = worker_index, error = %spawn_error, "worker_spawn_failed");
            }
        }
        drop(job_rx);
        drop(event_tx);

        for (index, job) in jobs.into_iter().enumerate() {
            if control.is_cancelled() {
                info!(remaining = board.len() - index, "batch_cancelled_before_dispatch");
                break;
            }
            if job_tx.send(QueuedJob { index, job }).is_err() {
                warn!(index, "no_workers_left_to_claim_jobs");
                break;
            }
        }
        drop(job_tx);

        for event in event_rx.iter() {
            apply_event(&mut board, event);
        }
    });

    let result = board.into_result(started.elapsed());
    info!(
        succeeded = result.succeeded_count(),
        failed = result.failed_count(),
        elapsed_ms = result.total_elapsed.as_millis() as u64,
        "batch_finished"
    );
    result
}

/// Runs the failed jobs of `previous` again as a fresh batch.
pub fn resubmit_failed<F, K>(
    previous: &BatchResult,
    config: &ExtractConfig,
    factory: &F,
    sink: &K,
) -> BatchResult
where
    F: SessionFactory,
    K: OutputSink + ?Sized,
{
    let jobs = previous.failed_jobs();
    info!(jobs = jobs.len(), "resubmitting_failed_jobs");
    run_batch(jobs, config, factory, sink)
}

fn apply_event(board: &mut JobBoard, event: WorkerEvent) {
    let applied = match event {
        WorkerEvent::Claimed { index, worker } => board.mark_running(index, worker),
        WorkerEvent::Finished {
            index,
            outcome: Ok(_),
            elapsed,
        } => board.mark_succeeded(index, elapsed),
        WorkerEvent::Finished {
            index,
            outcome: Err(error),
            elapsed,
        } => board.mark_failed(index, error, elapsed),
        WorkerEvent::Skipped { index, error } => {
            board.mark_failed(index, error, std::time::Duration::ZERO)
        }
    };
    if let Err(transition) = applied {
        warn!(error = %transition, "job_transition_rejected");
    }
}
