//! Promotion executor backed by the JFrog CLI (`jf rbp`).

use async_trait::async_trait;

use crate::services::lifecycle_api::{PromotionExecutor, PromotionReceipt, PromotionRequest};
use crate::services::lifecycle_client::LifecycleError;

/// Server id registered with `jf c add` when none is configured.
pub const DEFAULT_SERVER_ID: &str = "target-server";

/// Runs promotions through the `jf` binary against a configured server.
#[derive(Debug, Clone)]
pub struct JfCliExecutor {
    program: String,
    server_id: Option<String>,
}

impl Default for JfCliExecutor {
    fn default() -> Self {
        Self {
            program: "jf".to_string(),
            server_id: None,
        }
    }
}

impl JfCliExecutor {
    pub fn new(server_id: Option<String>) -> Self {
        Self {
            server_id,
            ..Default::default()
        }
    }

    /// Use a different binary, e.g. an absolute path to `jf`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    /// Register the target JPD with the CLI under `server_id`, replacing any
    /// existing entry of the same id.
    pub async fn configure(
        &self,
        server_id: &str,
        target_url: &str,
        access_token: &str,
    ) -> Result<(), LifecycleError> {
        tracing::info!(server_id, target = target_url, "Configuring JFrog CLI server");
        let args = build_config_args(server_id, target_url, access_token);
        self.run(&args).await?;
        Ok(())
    }

    async fn run(&self, args: &[String]) -> Result<String, LifecycleError> {
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(LifecycleError::CommandFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Arguments for `jf rbp`.
pub fn build_promote_args(request: &PromotionRequest, server_id: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "rbp".to_string(),
        request.bundle.name.clone(),
        request.bundle.version.clone(),
        request.environment.clone(),
        format!("--project={}", request.bundle.project_or_default()),
    ];
    if !request.included_repositories.is_empty() {
        let repos: Vec<&str> = request
            .included_repositories
            .iter()
            .map(String::as_str)
            .collect();
        args.push(format!("--include-repos={}", repos.join(",")));
    }
    if !request.excluded_repositories.is_empty() {
        let repos: Vec<&str> = request
            .excluded_repositories
            .iter()
            .map(String::as_str)
            .collect();
        args.push(format!("--exclude-repos={}", repos.join(",")));
    }
    if let Some(server_id) = server_id {
        args.push(format!("--server-id={}", server_id));
    }
    args
}

/// Arguments for `jf c add`.
pub fn build_config_args(server_id: &str, url: &str, access_token: &str) -> Vec<String> {
    vec![
        "c".to_string(),
        "add".to_string(),
        server_id.to_string(),
        format!("--url={}", url),
        format!("--access-token={}", access_token),
        "--interactive=false".to_string(),
        "--overwrite".to_string(),
    ]
}

#[async_trait]
impl PromotionExecutor for JfCliExecutor {
    async fn promote(&self, request: &PromotionRequest) -> Result<PromotionReceipt, LifecycleError> {
        let args = build_promote_args(request, self.server_id.as_deref());
        tracing::info!(command = %format!("{} {}", self.program, args.join(" ")), "Running JFrog CLI");

        let stdout = self.run(&args).await?;
        if !stdout.trim().is_empty() {
            tracing::debug!(stdout = %stdout.trim(), "JFrog CLI output");
        }
        Ok(PromotionReceipt::default())
    }

    fn executor_type(&self) -> &'static str {
        "jf-cli"
    }
}
