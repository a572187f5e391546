//! Process-level configuration loaded from environment variables.
//!
//! JPD coordinates and per-run options come from the CLI and the optional
//! YAML file (see `cli::sync`); this covers what the process needs no
//! matter which command runs.

use crate::error::{AppError, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener bind address for `serve` (host:port)
    pub bind_address: String,

    /// OTLP collector endpoint; span export is disabled when unset
    pub otel_endpoint: Option<String>,

    /// Service name reported to the collector
    pub otel_service_name: String,

    /// Shared secret for `X-JFrog-Event-Auth` webhook signatures
    pub webhook_secret: Option<String>,

    /// HTTP request timeout towards the JPDs, in seconds
    pub http_timeout_secs: u64,

    /// Retries for idempotent JPD requests
    pub http_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            otel_endpoint: None,
            otel_service_name: "rb-promotion-sync".into(),
            webhook_secret: None,
            http_timeout_secs: 30,
            http_max_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            otel_endpoint: non_empty_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or(defaults.otel_service_name),
            webhook_secret: non_empty_var("WEBHOOK_SECRET"),
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            http_max_retries: parse_var("HTTP_MAX_RETRIES", defaults.http_max_retries)?,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match non_empty_var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", name, value))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.http_max_retries, 3);
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("RBPS_TEST_TIMEOUT_GARBAGE", "soon");
        let result: Result<u64> = parse_var("RBPS_TEST_TIMEOUT_GARBAGE", 30);
        assert!(matches!(result, Err(AppError::Config(_))));
        env::remove_var("RBPS_TEST_TIMEOUT_GARBAGE");
    }

    #[test]
    fn test_parse_var_falls_back_when_unset_or_blank() {
        let result: Result<u64> = parse_var("RBPS_TEST_TIMEOUT_UNSET", 30);
        assert_eq!(result.unwrap(), 30);

        env::set_var("RBPS_TEST_TIMEOUT_BLANK", "  ");
        let result: Result<u64> = parse_var("RBPS_TEST_TIMEOUT_BLANK", 7);
        assert_eq!(result.unwrap(), 7);
        env::remove_var("RBPS_TEST_TIMEOUT_BLANK");
    }
}
