//! Tokio queue adapter
//!
//! Dispatches tasks on the runtime: `enqueue` spawns the handler
//! right away, `schedule_after` sleeps first. Pending scheduled tasks
//! live in a registry keyed by handle so they can be revoked before
//! they fire; a task removes itself from the registry at fire time,
//! and whichever side removes the entry first wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::queue::{Queue, ScheduledTask, TaskHandle, TaskHandler};

struct Pending {
    task: String,
    args: Value,
    delay: Duration,
    join: Option<tokio::task::JoinHandle<()>>,
}

struct QueueInner {
    handler: RwLock<Option<Arc<dyn TaskHandler>>>,
    scheduled: Mutex<HashMap<TaskHandle, Pending>>,
}

impl QueueInner {
    fn handler(&self) -> Result<Arc<dyn TaskHandler>, Error> {
        self.handler
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::adapter("no task handler registered"))
    }
}

/// Queue adapter dispatching on the tokio runtime
pub struct TokioQueue {
    inner: Arc<QueueInner>,
}

impl TokioQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                handler: RwLock::new(None),
                scheduled: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for TokioQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for TokioQueue {
    fn set_handler(&self, handler: Arc<dyn TaskHandler>) {
        *self.inner.handler.write().unwrap() = Some(handler);
    }

    async fn enqueue(&self, task: &str, args: Value) -> Result<TaskHandle, Error> {
        let handler = self.inner.handler()?;
        let handle = TaskHandle::generate();
        let task = task.to_string();
        tokio::spawn(async move {
            if let Err(e) = handler.run(&task, &args).await {
                tracing::error!(task = %task, "queued task failed: {}", e);
            }
        });
        Ok(handle)
    }

    async fn schedule_after(
        &self,
        task: &str,
        args: Value,
        delay: Duration,
    ) -> Result<TaskHandle, Error> {
        // fail fast rather than sleeping toward a missing handler
        self.inner.handler()?;

        let handle = TaskHandle::generate();
        let task = task.to_string();
        {
            let mut scheduled = self.inner.scheduled.lock().unwrap();
            scheduled.insert(
                handle.clone(),
                Pending {
                    task: task.clone(),
                    args: args.clone(),
                    delay,
                    join: None,
                },
            );
        }

        let inner = self.inner.clone();
        let fire_handle = handle.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // claim the entry; a revoke that got here first wins
            let claimed = inner.scheduled.lock().unwrap().remove(&fire_handle);
            if claimed.is_none() {
                return;
            }
            let handler = inner.handler.read().unwrap().clone();
            if let Some(handler) = handler {
                if let Err(e) = handler.run(&task, &args).await {
                    tracing::error!(task = %task, "scheduled task failed: {}", e);
                }
            }
        });

        if let Some(pending) = self.inner.scheduled.lock().unwrap().get_mut(&handle) {
            pending.join = Some(join);
        }
        Ok(handle)
    }

    async fn revoke(&self, handle: &TaskHandle) -> Result<(), Error> {
        let removed = self.inner.scheduled.lock().unwrap().remove(handle);
        if let Some(Pending { join: Some(join), .. }) = removed {
            join.abort();
        }
        Ok(())
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledTask>, Error> {
        let scheduled = self.inner.scheduled.lock().unwrap();
        Ok(scheduled
            .iter()
            .map(|(handle, pending)| ScheduledTask {
                handle: handle.clone(),
                task: pending.task.clone(),
                args: pending.args.clone(),
                delay: pending.delay,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn run(&self, _task: &str, _args: &Value) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting() -> Arc<CountingHandler> {
        Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_enqueue_dispatches() {
        let queue = TokioQueue::new();
        let handler = counting();
        queue.set_handler(handler.clone());

        queue.enqueue("t", json!({})).await.unwrap();
        // yield so the spawned task runs
        for _ in 0..10 {
            if handler.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_fires_after_delay() {
        let queue = TokioQueue::new();
        let handler = counting();
        queue.set_handler(handler.clone());

        queue
            .schedule_after("t", json!({}), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(queue.list_scheduled().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(queue.list_scheduled().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_cancels_pending_task() {
        let queue = TokioQueue::new();
        let handler = counting();
        queue.set_handler(handler.clone());

        let handle = queue
            .schedule_after("t", json!({}), Duration::from_secs(30))
            .await
            .unwrap();
        queue.revoke(&handle).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(queue.list_scheduled().await.unwrap().is_empty());
    }
}
