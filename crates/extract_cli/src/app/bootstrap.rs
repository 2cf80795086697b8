use std::num::NonZeroU32;
use std::str::FromStr;

use extractor::{ExtractConfig, SamplingCadence};
use tracing_subscriber::EnvFilter;

const WORKERS_ENV_VAR: &str = "REPLAY_EXTRACT_WORKERS";
const QUEUE_ENV_VAR: &str = "REPLAY_EXTRACT_QUEUE";
const JOBS_PER_SESSION_ENV_VAR: &str = "REPLAY_EXTRACT_JOBS_PER_SESSION";
const EVERY_ENV_VAR: &str = "REPLAY_EXTRACT_EVERY";

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Defaults overlaid with the `REPLAY_EXTRACT_*` environment variables.
pub(crate) fn config_from_env(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ExtractConfig, String> {
    let mut config = ExtractConfig::default();
    if let Some(workers) = parse_env::<usize>(&lookup, WORKERS_ENV_VAR, "usize")? {
        config.worker_count = workers;
    }
    if let Some(queue) = parse_env::<usize>(&lookup, QUEUE_ENV_VAR, "usize")? {
        config.queue_capacity = queue;
    }
    if let Some(jobs) = parse_env::<usize>(&lookup, JOBS_PER_SESSION_ENV_VAR, "usize")? {
        config.max_jobs_per_session = jobs;
    }
    if let Some(every) = parse_env::<NonZeroU32>(&lookup, EVERY_ENV_VAR, "non-zero u32")? {
        config.cadence = SamplingCadence::EveryNth(every);
    }
    Ok(config)
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    expected: &str,
) -> Result<Option<T>, String> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| format!("invalid {var} value '{raw}' (expected {expected})"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from_env(env_of(&[])).expect("config");
        assert_eq!(config, ExtractConfig::default());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config_from_env(env_of(&[
            (WORKERS_ENV_VAR, "8"),
            (QUEUE_ENV_VAR, " 32 "),
            (JOBS_PER_SESSION_ENV_VAR, "5"),
            (EVERY_ENV_VAR, "4"),
        ]))
        .expect("config");
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.max_jobs_per_session, 5);
        assert_eq!(
            config.cadence,
            SamplingCadence::EveryNth(NonZeroU32::new(4).expect("non-zero"))
        );
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let error = config_from_env(env_of(&[(EVERY_ENV_VAR, "0")])).expect_err("zero");
        assert_eq!(
            error,
            "invalid REPLAY_EXTRACT_EVERY value '0' (expected non-zero u32)"
        );
    }
}
