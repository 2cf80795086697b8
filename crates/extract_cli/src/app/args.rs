use std::num::{NonZeroU32, NonZeroU64};
use std::path::PathBuf;
use std::str::FromStr;

use extractor::{ExtractConfig, SamplingCadence};

use super::bootstrap::config_from_env;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config: ExtractConfig,
    pub recursive: bool,
    pub retry_rounds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CliCommand {
    Help,
    Run(RunRequest),
}

/// Parses command-line flags over the environment-derived configuration.
pub(crate) fn parse_args(
    args: &[String],
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<CliCommand, String> {
    if args.is_empty() {
        return Err("missing <input-dir> and <output-dir>".to_string());
    }
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        return Ok(CliCommand::Help);
    }

    let mut config = config_from_env(env_lookup)?;
    let mut recursive = false;
    let mut retry_rounds = 0u32;
    let mut positional = Vec::new();
    let mut index = 0usize;
    while index < args.len() {
        let arg = args[index].as_str();
        match arg {
            "--workers" => {
                config.worker_count = flag_value(args, index, "--workers", "usize")?;
                index += 2;
            }
            "--queue" => {
                config.queue_capacity = flag_value(args, index, "--queue", "usize")?;
                index += 2;
            }
            "--jobs-per-session" => {
                config.max_jobs_per_session =
                    flag_value(args, index, "--jobs-per-session", "usize")?;
                index += 2;
            }
            "--every" => {
                let every: NonZeroU32 = flag_value(args, index, "--every", "non-zero u32")?;
                config.cadence = SamplingCadence::EveryNth(every);
                index += 2;
            }
            "--min-gap" => {
                let gap: NonZeroU64 = flag_value(args, index, "--min-gap", "non-zero u64")?;
                config.cadence = SamplingCadence::MinFrameGap(gap);
                index += 2;
            }
            "--fps" => {
                let fps: f64 = flag_value(args, index, "--fps", "positive f64")?;
                if !fps.is_finite() || fps <= 0.0 {
                    return Err(format!("invalid --fps value '{fps}' (expected positive f64)"));
                }
                config.frames_per_second = fps;
                index += 2;
            }
            "--sink-attempts" => {
                config.sink_retry.max_attempts =
                    flag_value(args, index, "--sink-attempts", "u32")?;
                index += 2;
            }
            "--retry-failed" => {
                retry_rounds = flag_value(args, index, "--retry-failed", "u32")?;
                index += 2;
            }
            "--recursive" => {
                recursive = true;
                index += 1;
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
            _ => {
                positional.push(PathBuf::from(arg));
                index += 1;
            }
        }
    }

    let mut positional = positional.into_iter();
    let input_dir = positional
        .next()
        .ok_or_else(|| "missing <input-dir>".to_string())?;
    let output_dir = positional
        .next()
        .ok_or_else(|| "missing <output-dir>".to_string())?;
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{}'", extra.display()));
    }

    Ok(CliCommand::Run(RunRequest {
        input_dir,
        output_dir,
        config,
        recursive,
        retry_rounds,
    }))
}

fn flag_value<T: FromStr>(
    args: &[String],
    index: usize,
    flag: &str,
    expected: &str,
) -> Result<T, String> {
    let value = args
        .get(index + 1)
        .ok_or_else(|| format!("missing value for {flag}"))?;
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{value}' (expected {expected})"))
}
