//! CLI command runner for promotion sync.
//!
//! Wires the Lifecycle clients, the chosen executor and the sync services
//! together for each command and renders the results.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::{self, AppState};
use crate::cli::sync::{
    error, output, table_row, ExecutorKind, JpdConfig, SyncCli, SyncCommand, SyncConfig,
};
use crate::config::Config;
use crate::models::report::{PairOutcome, SyncReport};
use crate::services::jf_cli_executor::{JfCliExecutor, DEFAULT_SERVER_ID};
use crate::services::lifecycle_client::{
    LifecycleAuth, LifecycleClient, LifecycleClientConfig, RetryConfig,
};
use crate::services::metrics_service;
use crate::services::reconciler::ReconcileFilters;
use crate::services::replay_driver::ReplayDriver;
use crate::services::sync_service::SyncService;
use crate::services::webhook_service::{WebhookService, WebhookTrigger};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Run the promotion sync CLI command
pub async fn run(cli: SyncCli, app_config: &Config) -> CliResult<()> {
    // Load config file if provided
    let mut config = if let Some(ref config_path) = cli.config {
        SyncConfig::from_file(config_path)?
    } else {
        SyncConfig::default()
    };

    // Merge CLI args with config
    config.merge_with_cli(&cli);

    let format = cli.format.as_str();
    match &cli.command {
        SyncCommand::Sync { dry_run, .. } => run_sync(format, &config, app_config, *dry_run).await,
        SyncCommand::Replicate {
            bundle,
            version,
            environment,
            repository_key,
            project,
            full_sync,
            dry_run,
        } => {
            let trigger = WebhookTrigger {
                bundle_name: bundle.clone(),
                bundle_version: version.clone(),
                environment_hint: environment.clone(),
                repository_key: repository_key.clone(),
                project_key: project.clone(),
            };
            run_replicate(format, &config, app_config, &trigger, *full_sync, *dry_run).await
        }
        SyncCommand::Serve { bind, full_sync } => {
            let bind = bind.as_deref().unwrap_or(&app_config.bind_address);
            let full_sync = *full_sync || config.webhook_full_sync();
            run_serve(format, &config, app_config, bind, full_sync).await
        }
        SyncCommand::Test => run_test(format, &config, app_config).await,
    }
}

/// Build a Lifecycle client for one side of the sync.
fn build_client(
    format: &str,
    jpd: Option<&JpdConfig>,
    role: &str,
    app_config: &Config,
) -> CliResult<Arc<LifecycleClient>> {
    let url = jpd
        .and_then(|jpd| jpd.url.as_deref())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            error(format, &format!("No {} URL provided", role));
            format!("No {} URL provided", role)
        })?;
    let token = jpd
        .and_then(|jpd| jpd.token.as_deref())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            error(format, &format!("No {} access token provided", role));
            format!("No {} access token provided", role)
        })?;

    let client = LifecycleClient::new(LifecycleClientConfig {
        base_url: url.to_string(),
        auth: LifecycleAuth::AccessToken(token.to_string()),
        timeout_secs: app_config.http_timeout_secs,
        retry_config: RetryConfig {
            max_retries: app_config.http_max_retries,
            ..Default::default()
        },
        ..Default::default()
    })?;
    Ok(Arc::new(client))
}

/// Build the replay driver for the configured executor.
///
/// The timestamp aligner is always the target's REST client; the JFrog CLI
/// cannot rewrite promotion timestamps.
async fn build_driver(
    format: &str,
    config: &SyncConfig,
    target: Arc<LifecycleClient>,
    dry_run: bool,
) -> CliResult<ReplayDriver> {
    let driver = match config.executor_kind() {
        ExecutorKind::Rest => ReplayDriver::new(target.clone(), target),
        ExecutorKind::JfCli => {
            let executor = match config.jf_server_id() {
                Some(server_id) => JfCliExecutor::new(Some(server_id.to_string())),
                None => {
                    let executor = JfCliExecutor::new(Some(DEFAULT_SERVER_ID.to_string()));
                    if !dry_run {
                        let token = config
                            .target
                            .as_ref()
                            .and_then(|jpd| jpd.token.as_deref())
                            .unwrap_or_default();
                        executor
                            .configure(DEFAULT_SERVER_ID, target.base_url(), token)
                            .await
                            .map_err(|e| {
                                error(format, &format!("Failed to configure JFrog CLI: {}", e));
                                e
                            })?;
                    }
                    executor
                }
            };
            ReplayDriver::new(Arc::new(executor), target)
        }
    };
    Ok(driver.with_dry_run(dry_run))
}

/// Reconcile every bundle version on the source
async fn run_sync(
    format: &str,
    config: &SyncConfig,
    app_config: &Config,
    dry_run: bool,
) -> CliResult<()> {
    let source = build_client(format, config.source.as_ref(), "source", app_config)?;
    let target = build_client(format, config.target.as_ref(), "target", app_config)?;

    if format == "text" {
        output(
            format,
            &format!(
                "Syncing promotions from {} to {}",
                source.base_url(),
                target.base_url()
            ),
            None,
        );
        if let Some(environment) = config.environment_filter() {
            output(format, &format!("  Environment filter: {}", environment), None);
        }
        if let Some(project) = config.project_filter() {
            output(format, &format!("  Project filter: {}", project), None);
        }
        if dry_run {
            output(format, "Dry run: no changes will be made", None);
        }
    }

    let driver = build_driver(format, config, target.clone(), dry_run).await?;
    let filters = ReconcileFilters {
        environment: config.environment_filter().map(str::to_string),
        project: config.project_filter().map(str::to_string),
    };
    let service = SyncService::new(source, target, driver).with_filters(filters);

    let report = service.run().await.map_err(|e| {
        error(format, &format!("Failed to list Release Bundles: {}", e));
        e
    })?;

    print_report(format, &report);
    if report.has_failures() {
        return Err(format!("{} bundle version(s) failed to sync", report.failures()).into());
    }
    Ok(())
}

/// Replicate the promotion behind one webhook
async fn run_replicate(
    format: &str,
    config: &SyncConfig,
    app_config: &Config,
    trigger: &WebhookTrigger,
    full_sync: bool,
    dry_run: bool,
) -> CliResult<()> {
    let source = build_client(format, config.source.as_ref(), "source", app_config)?;
    let target = build_client(format, config.target.as_ref(), "target", app_config)?;
    let driver = build_driver(format, config, target.clone(), dry_run).await?;

    let service = WebhookService::new(source, target, driver).with_full_sync(full_sync);
    let outcome = service.handle(trigger).await;

    let bundle = trigger.bundle();
    output(
        format,
        &format!("{} -> {}: {}", bundle, trigger.environment_hint, outcome),
        Some(serde_json::json!({
            "bundle": bundle,
            "environment": trigger.environment_hint,
            "outcome": outcome,
        })),
    );

    if outcome.is_failure() {
        return Err(outcome.to_string().into());
    }
    Ok(())
}

/// Listen for promotion webhooks
async fn run_serve(
    format: &str,
    config: &SyncConfig,
    app_config: &Config,
    bind: &str,
    full_sync: bool,
) -> CliResult<()> {
    let source = build_client(format, config.source.as_ref(), "source", app_config)?;
    let target = build_client(format, config.target.as_ref(), "target", app_config)?;
    let driver = build_driver(format, config, target.clone(), false).await?;
    let webhook_service =
        Arc::new(WebhookService::new(source, target, driver).with_full_sync(full_sync));

    // Initialize Prometheus metrics recorder
    let metrics_handle = metrics_service::init_metrics();

    let mut state = AppState::new(webhook_service);
    state.set_metrics_handle(metrics_handle);
    match app_config
        .webhook_secret
        .as_deref()
        .or_else(|| config.webhook_secret())
    {
        Some(secret) => state.set_webhook_secret(secret),
        None => tracing::warn!("No webhook secret configured, accepting unsigned deliveries"),
    }

    let app = api::routes::create_router(Arc::new(state));
    let addr: SocketAddr = bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, full_sync, "Webhook listener started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Webhook listener stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

/// Test connectivity to both JPDs
async fn run_test(format: &str, config: &SyncConfig, app_config: &Config) -> CliResult<()> {
    let mut failed = false;
    for (role, jpd) in [("source", &config.source), ("target", &config.target)] {
        let client = build_client(format, jpd.as_ref(), role, app_config)?;
        output(
            format,
            &format!("Testing connection to {} ({})...", role, client.base_url()),
            None,
        );
        match client.ping().await {
            Ok(true) => output(
                format,
                "Connection successful!",
                Some(serde_json::json!({"jpd": role, "url": client.base_url(), "status": "success"})),
            ),
            Ok(false) => {
                error(
                    format,
                    &format!("Connection to {} failed: server returned non-success status", role),
                );
                failed = true;
            }
            Err(e) => {
                error(format, &format!("Connection to {} failed: {}", role, e));
                failed = true;
            }
        }
    }

    if failed {
        return Err("Connection failed".into());
    }
    Ok(())
}

/// Render a batch report as a table or JSON document
fn print_report(format: &str, report: &SyncReport) {
    if format == "json" {
        output(
            format,
            "",
            Some(serde_json::json!({
                "pairs": report.pairs,
                "summary": {
                    "total": report.pairs.len(),
                    "in_sync": report.count("in_sync"),
                    "replicated": report.count("replicated"),
                    "planned": report.count("planned"),
                    "failed": report.failures(),
                    "promotions_replicated": report.promotions_replicated(),
                },
            })),
        );
        return;
    }

    println!();
    table_row(&["Bundle", "Version", "Project", "Result"]);
    table_row(&["------", "-------", "-------", "------"]);
    for pair in &report.pairs {
        let result = pair.outcome.to_string();
        table_row(&[
            &pair.bundle.name,
            &pair.bundle.version,
            pair.bundle.project_or_default(),
            &result,
        ]);
    }

    let planned: usize = report
        .pairs
        .iter()
        .map(|pair| match pair.outcome {
            PairOutcome::Planned { count } => count,
            _ => 0,
        })
        .sum();
    println!();
    output(
        format,
        &format!(
            "{} version(s) checked: {} in sync, {} replicated, {} failed; {} promotion(s) replicated, {} planned",
            report.pairs.len(),
            report.count("in_sync"),
            report.count("replicated"),
            report.failures(),
            report.promotions_replicated(),
            planned,
        ),
        None,
    );
}
