//! Inline queue adapter
//!
//! Runs enqueued tasks synchronously inside the caller and parks
//! delayed tasks in an in-memory registry without ever firing them.
//! This is the test-mode adapter: a create call with an immediate
//! schedule produces its job before the call returns, and scheduled
//! retries are visible to assertions through `list_scheduled`.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::queue::{Queue, ScheduledTask, TaskHandle, TaskHandler};

/// Queue adapter that executes immediately
pub struct InlineQueue {
    handler: RwLock<Option<Arc<dyn TaskHandler>>>,
    scheduled: Mutex<Vec<ScheduledTask>>,
}

impl InlineQueue {
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(None),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    fn handler(&self) -> Result<Arc<dyn TaskHandler>, Error> {
        self.handler
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::adapter("no task handler registered"))
    }
}

impl Default for InlineQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InlineQueue {
    fn set_handler(&self, handler: Arc<dyn TaskHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    async fn enqueue(&self, task: &str, args: Value) -> Result<TaskHandle, Error> {
        let handler = self.handler()?;
        handler.run(task, &args).await?;
        Ok(TaskHandle::generate())
    }

    async fn schedule_after(
        &self,
        task: &str,
        args: Value,
        delay: Duration,
    ) -> Result<TaskHandle, Error> {
        let handle = TaskHandle::generate();
        self.scheduled.lock().unwrap().push(ScheduledTask {
            handle: handle.clone(),
            task: task.to_string(),
            args,
            delay,
        });
        Ok(handle)
    }

    async fn revoke(&self, handle: &TaskHandle) -> Result<(), Error> {
        self.scheduled
            .lock()
            .unwrap()
            .retain(|t| &t.handle != handle);
        Ok(())
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledTask>, Error> {
        Ok(self.scheduled.lock().unwrap().clone())
    }
}
