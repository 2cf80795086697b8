mod args;
mod bootstrap;
mod runner;

pub(crate) use args::{parse_args, CliCommand};
pub(crate) use bootstrap::init_tracing;
pub(crate) use runner::run_extraction;
