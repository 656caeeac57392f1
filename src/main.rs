use std::process::ExitCode;

use clap::Parser;

use mongosync::cli::{Cli, Operation};
use mongosync::config::Config;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let operation = match cli.operation() {
        Some(op) => op,
        None => {
            tracing::error!(
                "Usage: <operation> where operation belongs to 'start', 'test-write'"
            );
            return ExitCode::FAILURE;
        }
    };

    // Fail fast on a broken configuration file before spawning anything;
    // each worker will reload its own copy from the same path.
    if let Err(e) = Config::load(&cli.config_path) {
        tracing::error!(error = %e, path = %cli.config_path, "failed to load configuration");
        return ExitCode::FAILURE;
    }

    match operation {
        Operation::Start => run_start(cli.config_path),
        Operation::TestWrite => {
            tracing::error!(
                "'test-write' is a synthetic load-generation utility out of scope for this build"
            );
            ExitCode::FAILURE
        }
    }
}

fn run_start(config_path: String) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to build the main Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(mongosync::orchestrator::run(config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "clone run ended in error");
            ExitCode::FAILURE
        }
    }
}
