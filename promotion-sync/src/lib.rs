//! Release Bundle Promotion Sync - Library
//!
//! Keeps the Release Bundle v2 promotion history of a target JFrog Platform
//! Deployment in step with a source, either in batch or per webhook.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
