//! Release Bundle Promotion Sync - Main Entry Point

use std::process::ExitCode;

use clap::Parser;

use rb_promotion_sync::{
    cli::{self, SyncCli},
    config::Config,
    telemetry,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = SyncCli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing (with optional OTLP export)
    let _otel_guard = telemetry::init_tracing(
        config.otel_endpoint.as_deref(),
        &config.otel_service_name,
        cli.verbose,
    );

    match cli::run_sync(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Promotion sync failed");
            ExitCode::FAILURE
        }
    }
}
