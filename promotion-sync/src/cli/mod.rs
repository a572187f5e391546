//! CLI modules for Release Bundle promotion sync.

pub mod sync;
pub mod sync_runner;

pub use sync::{SyncCli, SyncCommand, SyncConfig};
pub use sync_runner::run as run_sync;
