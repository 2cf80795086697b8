use std::fs;
use std::path::{Path, PathBuf};

use extractor::{
    resubmit_failed, run_batch, validate_output, BatchResult, DirectorySink, ErrorInfo,
    ExtractionOutput, JobRef, JobState, OutputSink, ReplayFileFactory, SinkError, SinkReceipt,
};
use serde::Serialize;
use tracing::{info, warn};

use super::args::RunRequest;

const OBSERVATION_EXTENSION: &str = "jsonl";
const REPORT_FILE_NAME: &str = "batch_report.json";
const REPORT_FORMAT_VERSION: u16 = 1;
const ISSUES_LOGGED_PER_JOB: usize = 5;

#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub summary: String,
    pub all_succeeded: bool,
    pub report_path: PathBuf,
}

pub(crate) fn run_extraction(request: &RunRequest) -> Result<RunOutcome, String> {
    info!(
        input = %request.input_dir.display(),
        output = %request.output_dir.display(),
        "=== Replay Extract Startup ==="
    );
    fs::create_dir_all(&request.output_dir).map_err(|error| {
        format!(
            "failed to create output directory {}: {error}",
            request.output_dir.display()
        )
    })?;
    let jobs = discover_jobs(&request.input_dir, &request.output_dir, request.recursive)?;
    info!(jobs = jobs.len(), recursive = request.recursive, "jobs_discovered");

    let sink = ValidatingSink {
        inner: DirectorySink::new(&request.output_dir)
            .with_frames_per_second(request.config.frames_per_second),
    };
    let factory = ReplayFileFactory;
    let mut result = run_batch(jobs, &request.config, &factory, &sink);
    let mut rounds = 1u32;
    for round in 1..=request.retry_rounds {
        if result.is_success() {
            break;
        }
        info!(round, failed = result.failed_count(), "retry_round_started");
        let retry = resubmit_failed(&result, &request.config, &factory, &sink);
        result = merge_retry(result, retry);
        rounds += 1;
    }

    let report_path = request.output_dir.join(REPORT_FILE_NAME);
    write_report(&report_path, request, rounds, &result)?;
    Ok(RunOutcome {
        summary: result.render_human_readable(),
        all_succeeded: result.is_success(),
        report_path,
    })
}

/// Observation files under `input_dir`, sorted by path. With `recursive`
/// the output stem keeps the relative directory so nested files with the
/// same name do not collide.
pub(crate) fn discover_jobs(
    input_dir: &Path,
    output_dir: &Path,
    recursive: bool,
) -> Result<Vec<JobRef>, String> {
    let mut paths = Vec::new();
    collect_observation_files(input_dir, output_dir, recursive, &mut paths)?;
    paths.sort();
    Ok(paths
        .iter()
        .map(|path| match output_stem(input_dir, path) {
            Some(stem) => JobRef::new(path.clone(), stem),
            None => JobRef::from_path(path),
        })
        .collect())
}

fn collect_observation_files(
    dir: &Path,
    output_dir: &Path,
    recursive: bool,
    paths: &mut Vec<PathBuf>,
) -> Result<(), String> {
    let entries = fs::read_dir(dir)
        .map_err(|error| format!("failed to read input directory {}: {error}", dir.display()))?;
    for entry in entries {
        let entry = entry
            .map_err(|error| format!("failed to read entry in {}: {error}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            if recursive && path != output_dir {
                collect_observation_files(&path, output_dir, recursive, paths)?;
            }
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some(OBSERVATION_EXTENSION) {
            paths.push(path);
        }
    }
    Ok(())
}

fn output_stem(input_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(input_dir).ok()?.with_extension("");
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    (!parts.is_empty()).then(|| parts.join("__"))
}

/// Folds a resubmission round into the running result: retried jobs take
/// their newest outcome.
fn merge_retry(base: BatchResult, retry: BatchResult) -> BatchResult {
    let mut timings = base
        .timings
        .into_iter()
        .filter(|timing| {
            !retry
                .timings
                .iter()
                .any(|retried| retried.job == timing.job)
        })
        .collect::<Vec<_>>();
    timings.extend(retry.timings);
    timings.sort_by(|a, b| a.job.cmp(&b.job));

    let mut succeeded = base.succeeded;
    succeeded.extend(retry.succeeded);
    succeeded.sort();

    BatchResult {
        succeeded,
        failed: retry.failed,
        timings,
        total_elapsed: base.total_elapsed + retry.total_elapsed,
    }
}

/// Runs [`validate_output`] before writing. Issues are logged; the output is
/// still written.
struct ValidatingSink {
    inner: DirectorySink,
}

impl OutputSink for ValidatingSink {
    fn write(&self, job: &JobRef, output: &ExtractionOutput) -> Result<SinkReceipt, SinkError> {
        let report = validate_output(output);
        if !report.is_clean() {
            warn!(
                job = %job,
                issues = report.issues.len(),
                rows = report.rows_checked,
                "output_validation_failed"
            );
            for issue in report.issues.iter().take(ISSUES_LOGGED_PER_JOB) {
                warn!(job = %job, issue = %issue, "output_validation_issue");
            }
        }
        self.inner.write(job, output)
    }
}

#[derive(Debug, Serialize)]
struct BatchReportDocument {
    format_version: u16,
    extractor_version: &'static str,
    input_dir: String,
    output_dir: String,
    rounds: u32,
    succeeded: usize,
    failed: usize,
    total_elapsed_ms: u64,
    jobs: Vec<JobReportEntry>,
}

#[derive(Debug, Serialize)]
struct JobReportEntry {
    source: String,
    output_stem: String,
    state: JobState,
    worker: Option<usize>,
    elapsed_ms: u64,
    error: Option<ErrorInfo>,
}

fn write_report(
    path: &Path,
    request: &RunRequest,
    rounds: u32,
    result: &BatchResult,
) -> Result<(), String> {
    let jobs = result
        .timings
        .iter()
        .map(|timing| JobReportEntry {
            source: timing.job.source.display().to_string(),
            output_stem: timing.job.output_stem.clone(),
            state: timing.state,
            worker: timing.worker,
            elapsed_ms: timing.elapsed.as_millis() as u64,
            error: result
                .failed
                .iter()
                .find(|failed| failed.job == timing.job)
                .map(|failed| failed.error.clone()),
        })
        .collect();
    let document = BatchReportDocument {
        format_version: REPORT_FORMAT_VERSION,
        extractor_version: env!("CARGO_PKG_VERSION"),
        input_dir: request.input_dir.display().to_string(),
        output_dir: request.output_dir.display().to_string(),
        rounds,
        succeeded: result.succeeded_count(),
        failed: result.failed_count(),
        total_elapsed_ms: result.total_elapsed.as_millis() as u64,
        jobs,
    };
    let bytes = serde_json::to_vec_pretty(&document)
        .map_err(|error| format!("failed to encode batch report: {error}"))?;
    fs::write(path, bytes)
        .map_err(|error| format!("failed to write batch report {}: {error}", path.display()))?;
    info!(path = %path.display(), "batch_report_written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use extractor::{ErrorKind, ExtractConfig, FailedJob, JobTiming};
    use tempfile::TempDir;

    use super::*;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    fn request(input: &Path, output: &Path) -> RunRequest {
        RunRequest {
            input_dir: input.to_path_buf(),
            output_dir: output.to_path_buf(),
            config: ExtractConfig {
                worker_count: 2,
                ..ExtractConfig::default()
            },
            recursive: false,
            retry_rounds: 1,
        }
    }

    #[test]
    fn discovery_is_sorted_and_filters_extension() {
        let temp = TempDir::new().expect("tempdir");
        touch(&temp.path().join("b.jsonl"), "");
        touch(&temp.path().join("a.jsonl"), "");
        touch(&temp.path().join("notes.txt"), "");
        touch(&temp.path().join("nested/c.jsonl"), "");

        let out = temp.path().join("out");
        let flat = discover_jobs(temp.path(), &out, false).expect("discover");
        let stems: Vec<&str> = flat.iter().map(|job| job.output_stem.as_str()).collect();
        assert_eq!(stems, vec!["a", "b"]);

        let deep = discover_jobs(temp.path(), &out, true).expect("discover");
        let stems: Vec<&str> = deep.iter().map(|job| job.output_stem.as_str()).collect();
        assert_eq!(stems, vec!["a", "b", "nested__c"]);
    }

    #[test]
    fn missing_input_dir_is_an_error() {
        let temp = TempDir::new().expect("tempdir");
        let error = discover_jobs(&temp.path().join("absent"), temp.path(), false)
            .expect_err("must fail");
        assert!(error.starts_with("failed to read input directory"));
    }

    #[test]
    fn merge_keeps_newest_outcome_per_job() {
        let a = JobRef::new("a.jsonl", "a");
        let b = JobRef::new("b.jsonl", "b");
        let timing = |job: &JobRef, state| JobTiming {
            job: job.clone(),
            state,
            worker: Some(0),
            elapsed: Duration::from_millis(10),
        };
        let base = BatchResult {
            succeeded: vec![a.clone()],
            failed: vec![FailedJob {
                job: b.clone(),
                error: ErrorInfo::new(ErrorKind::Source, "truncated"),
            }],
            timings: vec![timing(&a, JobState::Succeeded), timing(&b, JobState::Failed)],
            total_elapsed: Duration::from_millis(20),
        };
        let retry = BatchResult {
            succeeded: vec![b.clone()],
            failed: Vec::new(),
            timings: vec![timing(&b, JobState::Succeeded)],
            total_elapsed: Duration::from_millis(10),
        };
        let merged = merge_retry(base, retry);
        assert!(merged.is_success());
        assert_eq!(merged.succeeded, vec![a, b]);
        assert!(merged
            .timings
            .iter()
            .all(|timing| timing.state == JobState::Succeeded));
        assert_eq!(merged.total_elapsed, Duration::from_millis(30));
    }

    #[test]
    fn run_writes_outputs_and_report() {
        let temp = TempDir::new().expect("tempdir");
        let input = temp.path().join("replays");
        let output = temp.path().join("dataset");
        touch(
            &input.join("good.jsonl"),
            concat!(
                r#"{"frame_index":0,"sides":{"1":{"entities":[{"tag":1,"type_id":48,"position":{"x":1.0,"y":2.0},"vitals":{"health":45.0,"health_max":45.0}}]}}}"#,
                "\n",
                r#"{"frame_index":1,"sides":{"1":{"entities":[]}}}"#,
                "\n",
            ),
        );
        touch(
            &input.join("regress.jsonl"),
            concat!(r#"{"frame_index":5}"#, "\n", r#"{"frame_index":2}"#, "\n"),
        );

        let outcome = run_extraction(&request(&input, &output)).expect("run");
        assert!(!outcome.all_succeeded);
        assert!(outcome
            .summary
            .starts_with("jobs=2 succeeded=1 failed=1"));
        assert!(output.join("good.manifest.json").is_file());
        assert!(!output.join("regress.manifest.json").exists());

        let report: serde_json::Value =
            serde_json::from_slice(&fs::read(&outcome.report_path).expect("read report"))
                .expect("decode report");
        assert_eq!(report["rounds"], 2);
        assert_eq!(report["succeeded"], 1);
        assert_eq!(report["jobs"][0]["output_stem"], "good");
        assert_eq!(report["jobs"][1]["error"]["kind"], "source");
    }
}
