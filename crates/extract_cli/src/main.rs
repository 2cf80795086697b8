mod app;

use std::env;
use std::process::ExitCode;

use app::{parse_args, run_extraction, CliCommand};

fn main() -> ExitCode {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let request = match parse_args(&args, |name| env::var(name).ok()) {
        Ok(CliCommand::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(CliCommand::Run(request)) => request,
        Err(message) => {
            eprintln!("{message}");
            eprintln!();
            eprintln!("{}", usage_text());
            return ExitCode::from(1);
        }
    };

    app::init_tracing();
    match run_extraction(&request) {
        Ok(outcome) => {
            println!("{}", outcome.summary);
            println!("report={}", outcome.report_path.display());
            if outcome.all_succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "replay_extract - replay observation to tabular dataset extractor",
        "",
        "Usage:",
        "  replay_extract [options] <input-dir> <output-dir>",
        "",
        "Options:",
        "  --workers <usize>           parallel extraction workers",
        "  --queue <usize>             job queue capacity",
        "  --jobs-per-session <usize>  jobs served by one session before it is recycled",
        "  --every <u32>               sample every n-th frame",
        "  --min-gap <u64>             sample frames at least this many frame indices apart",
        "  --fps <f64>                 frames per second for timestamp_seconds",
        "  --sink-attempts <u32>       output write attempts per job",
        "  --retry-failed <u32>        resubmission rounds for failed jobs",
        "  --recursive                 discover observation files in subdirectories",
        "",
        "Defaults:",
        "  --workers 4",
        "  --queue 16",
        "  --jobs-per-session 25",
        "  --every 1",
        "  --fps 22.4",
        "  --sink-attempts 3",
        "  --retry-failed 0",
        "",
        "Environment:",
        "  REPLAY_EXTRACT_WORKERS, REPLAY_EXTRACT_QUEUE, REPLAY_EXTRACT_JOBS_PER_SESSION,",
        "  REPLAY_EXTRACT_EVERY override defaults; flags override the environment.",
        "  RUST_LOG sets the log filter (default info).",
    ]
    .join("\n")
}
