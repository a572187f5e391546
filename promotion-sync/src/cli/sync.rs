//! CLI commands for Release Bundle promotion sync.
//!
//! Arguments fall back to environment variables so the same binary runs
//! from a shell, a CI job, or a webhook-triggered container.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Replicate Release Bundle promotions from a source JPD to a target JPD
#[derive(Parser, Debug)]
#[command(name = "rb-promotion-sync")]
#[command(
    about = "Replicate Release Bundle v2 promotions between JFrog Platform Deployments",
    long_about = None
)]
pub struct SyncCli {
    #[command(subcommand)]
    pub command: SyncCommand,

    /// Path to config file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Source JPD base URL (e.g. https://jpd1.jfrog.io)
    #[arg(long, env = "SOURCE_URL", global = true)]
    pub source_url: Option<String>,

    /// Target JPD base URL
    #[arg(long, env = "TARGET_URL", global = true)]
    pub target_url: Option<String>,

    /// Access token for the source JPD
    #[arg(long, env = "SOURCE_ACCESS_TOKEN", global = true, hide_env_values = true)]
    pub source_token: Option<String>,

    /// Access token for the target JPD
    #[arg(long, env = "TARGET_ACCESS_TOKEN", global = true, hide_env_values = true)]
    pub target_token: Option<String>,

    /// How promotions are applied on the target
    #[arg(long, value_enum, env = "PROMOTION_EXECUTOR", global = true)]
    pub executor: Option<ExecutorKind>,

    /// JFrog CLI server id to promote through (jf-cli executor)
    #[arg(long, env = "JF_SERVER_ID", global = true)]
    pub jf_server_id: Option<String>,

    /// Output format (json, text)
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Reconcile every Release Bundle version on the source against the target
    Sync {
        /// Only replicate promotions to this environment
        #[arg(long)]
        environment: Option<String>,

        /// Only sync bundles of this project
        #[arg(long)]
        project: Option<String>,

        /// Show what would be replicated without changing the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Replicate the promotion of a single bundle version (webhook handler)
    Replicate {
        /// Release Bundle name
        #[arg(long, env = "RELEASE_BUNDLE")]
        bundle: String,

        /// Release Bundle version
        #[arg(long, env = "BUNDLE_VERSION")]
        version: String,

        /// Environment the bundle was promoted to on the source
        #[arg(long, env = "ENVIRONMENT")]
        environment: String,

        /// Release Bundle repository key
        #[arg(long, env = "REPOSITORY_KEY")]
        repository_key: Option<String>,

        /// Project key of the bundle
        #[arg(long, env = "PROJECT_KEY")]
        project: Option<String>,

        /// Reconcile the full history of the version instead of one event
        #[arg(long)]
        full_sync: bool,

        /// Show what would be replicated without changing the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Listen for JFrog promotion webhooks
    Serve {
        /// Listener address (host:port)
        #[arg(long, env = "BIND_ADDRESS")]
        bind: Option<String>,

        /// Reconcile the full history of each notified version
        #[arg(long)]
        full_sync: bool,
    },

    /// Test connectivity to the source and target JPDs
    Test,
}

/// Promotion executor used on the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Lifecycle REST API
    #[default]
    Rest,
    /// JFrog CLI `jf rbp`
    JfCli,
}

/// Configuration loaded from YAML file
#[derive(Debug, Deserialize, Default)]
pub struct SyncConfig {
    pub source: Option<JpdConfig>,
    pub target: Option<JpdConfig>,
    pub executor: Option<ExecutorConfig>,
    pub sync: Option<SyncOptions>,
    pub webhook: Option<WebhookOptions>,
}

#[derive(Debug, Deserialize, Default)]
pub struct JpdConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecutorConfig {
    pub kind: Option<ExecutorKind>,
    pub server_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SyncOptions {
    pub environment: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookOptions {
    pub secret: Option<String>,
    pub full_sync: Option<bool>,
}

impl SyncConfig {
    /// Load config from YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Merge CLI args with config file
    pub fn merge_with_cli(&mut self, cli: &SyncCli) {
        // CLI args override config file
        if let Some(ref url) = cli.source_url {
            self.source.get_or_insert_with(Default::default).url = Some(url.clone());
        }
        if let Some(ref token) = cli.source_token {
            self.source.get_or_insert_with(Default::default).token = Some(token.clone());
        }
        if let Some(ref url) = cli.target_url {
            self.target.get_or_insert_with(Default::default).url = Some(url.clone());
        }
        if let Some(ref token) = cli.target_token {
            self.target.get_or_insert_with(Default::default).token = Some(token.clone());
        }
        if let Some(kind) = cli.executor {
            self.executor.get_or_insert_with(Default::default).kind = Some(kind);
        }
        if let Some(ref server_id) = cli.jf_server_id {
            self.executor.get_or_insert_with(Default::default).server_id = Some(server_id.clone());
        }

        if let SyncCommand::Sync {
            environment,
            project,
            ..
        } = &cli.command
        {
            let sync = self.sync.get_or_insert_with(Default::default);
            if environment.is_some() {
                sync.environment = environment.clone();
            }
            if project.is_some() {
                sync.project = project.clone();
            }
        }
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.executor
            .as_ref()
            .and_then(|executor| executor.kind)
            .unwrap_or_default()
    }

    pub fn jf_server_id(&self) -> Option<&str> {
        self.executor
            .as_ref()
            .and_then(|executor| executor.server_id.as_deref())
    }

    pub fn environment_filter(&self) -> Option<&str> {
        self.sync.as_ref().and_then(|sync| sync.environment.as_deref())
    }

    pub fn project_filter(&self) -> Option<&str> {
        self.sync.as_ref().and_then(|sync| sync.project.as_deref())
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook.as_ref().and_then(|webhook| webhook.secret.as_deref())
    }

    pub fn webhook_full_sync(&self) -> bool {
        self.webhook
            .as_ref()
            .and_then(|webhook| webhook.full_sync)
            .unwrap_or(false)
    }
}

/// Print message based on output format
pub fn output(format: &str, message: &str, json_value: Option<serde_json::Value>) {
    match format {
        "json" => {
            let value = json_value.unwrap_or_else(|| serde_json::json!({ "message": message }));
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_default()
            );
        }
        _ => {
            println!("{}", message);
        }
    }
}

/// Print error message
pub fn error(format: &str, message: &str) {
    match format {
        "json" => {
            eprintln!("{}", serde_json::json!({ "error": message }));
        }
        _ => {
            eprintln!("Error: {}", message);
        }
    }
}

/// Print table row
pub fn table_row(cells: &[&str]) {
    println!("{}", cells.join("\t"));
}
