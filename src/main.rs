use std::process::ExitCode;

use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use transcode_orchestrator::config::env::{self, EnvKey};
use transcode_orchestrator::config::AppConfig;
use transcode_orchestrator::infrastructure::redact_url;
use transcode_orchestrator::orchestrator::Orchestrator;
use transcode_orchestrator::{build_state, shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_tracing();

    info!("Starting transcode orchestrator...");

    let config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        amqp = %redact_url(&config.amqp_url),
        queue_backend = ?config.queue_backend,
        concurrency = config.worker_concurrency,
        "Configuration loaded"
    );

    let state = match build_state(config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to build services: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let signals = shutdown::listen();
    match Orchestrator::new(state).run(signals).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Orchestrator failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lapin=warn"));

    if env::get_or(EnvKey::LogFormat, "pretty").eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}
