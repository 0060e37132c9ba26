//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt subscriber. Per-job runner
//! output goes to each job's own log file, not here; this subscriber
//! covers the scheduler and queue events.

use crate::config::AppConfig;
use tracing::Level;

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &AppConfig) {
    let level = if config.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
