//! Promotion sync services and JPD collaborators.

pub mod correlator;
pub mod jf_cli_executor;
pub mod lifecycle_api;
pub mod lifecycle_client;
pub mod metrics_service;
pub mod reconciler;
pub mod replay_driver;
pub mod sync_service;
pub mod webhook_service;
