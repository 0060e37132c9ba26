//! Task queue boundary
//!
//! The scheduler and the workflow model consume queueing through the
//! [`Queue`] trait only: run a task now, after a delay, or revoke a
//! pending one. The executing side is wired in by registering a
//! [`TaskHandler`] at startup, which keeps the dependency
//! one-directional: nothing in the models layer ever names the
//! scheduler.
//!
//! Two adapters ship with the crate: [`TokioQueue`] dispatches on the
//! runtime, [`InlineQueue`] executes immediately for tests.

pub mod inline;
pub mod runtime;

pub use inline::InlineQueue;
pub use runtime::TokioQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::Error;
use crate::store::new_uuid;

/// Task name for one workflow execution attempt
pub const WORKFLOW_EXECUTE: &str = "workflow-execute";

/// Opaque handle of a dispatched or pending task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: String,
}

impl TaskHandle {
    pub(crate) fn generate() -> Self {
        Self { id: new_uuid() }
    }

    /// Rebuild a handle from its persisted id
    pub fn from_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The handle id, persisted onto `Workflow.task_id`
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A pending scheduled task
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub handle: TaskHandle,
    pub task: String,
    pub args: Value,
    pub delay: Duration,
}

/// The executing side of the queue, registered at startup
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task
    async fn run(&self, task: &str, args: &Value) -> Result<(), Error>;
}

/// Task dispatch boundary
#[async_trait]
pub trait Queue: Send + Sync {
    /// Register the task handler. Dispatch before registration fails
    /// with an adapter error.
    fn set_handler(&self, handler: Arc<dyn TaskHandler>);

    /// Run a task as soon as possible
    async fn enqueue(&self, task: &str, args: Value) -> Result<TaskHandle, Error>;

    /// Run a task after a delay
    async fn schedule_after(
        &self,
        task: &str,
        args: Value,
        delay: Duration,
    ) -> Result<TaskHandle, Error>;

    /// Cancel a pending scheduled task. Revoking an unknown or
    /// already-fired handle is a no-op.
    async fn revoke(&self, handle: &TaskHandle) -> Result<(), Error>;

    /// List pending scheduled tasks
    async fn list_scheduled(&self) -> Result<Vec<ScheduledTask>, Error>;
}

/// Build the queue the config asks for: inline in test mode,
/// runtime-dispatched otherwise
pub fn default_queue(config: &AppConfig) -> Arc<dyn Queue> {
    if config.inline_tasks {
        Arc::new(InlineQueue::new())
    } else {
        Arc::new(TokioQueue::new())
    }
}
