// src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;

use stack_it_now::config::{AppConfig, LogConfig};
use stack_it_now::scenario::Scenario;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let env_result = dotenvy::dotenv();

    let log_config = LogConfig::from_env();
    let filter = EnvFilter::try_new(log_config.filter()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = env_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!("Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();
    let Some(path) = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| app_config.scenario.path().cloned())
    else {
        error!("Usage: stack-it-now <scenario.json> (or set STACK_IT_NOW_SCENARIO)");
        return ExitCode::from(2);
    };

    let scenario = match Scenario::from_path(&path) {
        Ok(scenario) => scenario,
        Err(err) => {
            error!("{}: {}", path.display(), err);
            return ExitCode::FAILURE;
        }
    };

    info!("Replaying {} steps from {}", scenario.steps.len(), path.display());
    let result = scenario.run(&app_config.scenario_options(), |event| {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(err) => warn!("Could not serialize event: {}", err),
        }
    });

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Scenario aborted: {}", err);
            ExitCode::FAILURE
        }
    }
}
