//! Runner boundary
//!
//! The engine that performs the actual comparison/copy work for a
//! resolved step list is an external collaborator, consumed through
//! this trait only. Step references are resolved to literal urls
//! before the runner sees them.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWrite;

use crate::error::RunnerError;
use crate::models::Step;

/// Per-attempt log destination, usually the job's log file
pub type LogSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Step execution engine
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute the resolved steps of one workflow attempt.
    ///
    /// Output becomes the job's `result.data`; a [`RunnerError`]
    /// becomes `result.error` with its type tag and message. The
    /// scheduler enforces the workflow's wall-clock timeout around
    /// this call and cancels it on expiry.
    async fn execute(
        &self,
        workflow: &str,
        steps: &[Step],
        log: &mut LogSink,
        verbose: bool,
    ) -> Result<Value, RunnerError>;
}
