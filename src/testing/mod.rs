//! Test utilities
//!
//! Shared fakes for exercising the scheduler and store without a
//! database or a real step engine: a memory-backed [`TestApp`]
//! context, a [`ScriptedRunner`] with programmable outcomes, and a
//! [`CountingEngine`] wrapper for asserting how often storage is hit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::error::{Error, RunnerError};
use crate::models::{Database, Job, Step, Workflow};
use crate::queue::{InlineQueue, Queue};
use crate::runner::{LogSink, Runner};
use crate::scheduler::Scheduler;
use crate::store::{
    new_uuid, Changes, MemoryEngine, Predicate, Record, SelectSpec, StorageEngine, Store,
    TableSchema,
};

/// Build a record from a JSON object literal
pub fn record(value: Value) -> Record {
    value
        .as_object()
        .expect("record literal must be a JSON object")
        .clone()
}

/// One programmed runner outcome
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed(Value),
    Fail(String, String),
    /// Sleep first, then succeed (for exercising timeouts)
    SucceedAfter(Duration, Value),
}

/// Runner fake with programmable outcomes.
///
/// Outcomes are consumed front to back; when the script runs dry the
/// last configured outcome repeats. A gated runner additionally waits
/// for one semaphore permit per call before finishing, so tests can
/// hold an attempt in its running state.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ScriptedOutcome,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    fn with_fallback(fallback: ScriptedOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always succeed with `value`
    pub fn ok(value: Value) -> Self {
        Self::with_fallback(ScriptedOutcome::Succeed(value))
    }

    /// Always fail with the given error type and message
    pub fn failing(kind: &str, message: &str) -> Self {
        Self::with_fallback(ScriptedOutcome::Fail(kind.to_string(), message.to_string()))
    }

    /// Sleep for `delay` before succeeding
    pub fn sleeping(delay: Duration, value: Value) -> Self {
        Self::with_fallback(ScriptedOutcome::SucceedAfter(delay, value))
    }

    /// Play the outcomes in order, repeating the last one
    pub fn sequence(outcomes: Vec<ScriptedOutcome>) -> Self {
        let fallback = outcomes.last().expect("sequence must not be empty").clone();
        Self {
            script: Mutex::new(outcomes.into()),
            fallback,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Succeed with `value`, but only after the test releases a
    /// permit on the returned semaphore
    pub fn gated(value: Value) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut runner = Self::with_fallback(ScriptedOutcome::Succeed(value));
        runner.gate = Some(gate.clone());
        (Arc::new(runner), gate)
    }

    /// Number of times the runner has been invoked
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn execute(
        &self,
        workflow: &str,
        steps: &[Step],
        log: &mut LogSink,
        _verbose: bool,
    ) -> Result<Value, RunnerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let line = format!("running {} ({} steps)\n", workflow, steps.len());
        log.write_all(line.as_bytes()).await.ok();

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("runner gate closed").forget();
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match outcome {
            ScriptedOutcome::Succeed(value) => Ok(value),
            ScriptedOutcome::Fail(kind, message) => Err(RunnerError::new(kind, message)),
            ScriptedOutcome::SucceedAfter(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
        }
    }
}

/// Engine wrapper counting operations, for memoization assertions
pub struct CountingEngine {
    inner: Arc<dyn StorageEngine>,
    selects: AtomicUsize,
    inserts: AtomicUsize,
    updates: AtomicUsize,
}

impl CountingEngine {
    pub fn new(inner: Arc<dyn StorageEngine>) -> Self {
        Self {
            inner,
            selects: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.selects.store(0, Ordering::SeqCst);
        self.inserts.store(0, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageEngine for CountingEngine {
    async fn apply_schema(&self, schema: &TableSchema) -> Result<(), Error> {
        self.inner.apply_schema(schema).await
    }

    async fn insert(&self, schema: &TableSchema, rows: Vec<Record>) -> Result<u64, Error> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(schema, rows).await
    }

    async fn select(&self, schema: &TableSchema, spec: &SelectSpec) -> Result<Vec<Record>, Error> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select(schema, spec).await
    }

    async fn update(
        &self,
        schema: &TableSchema,
        filter: &Predicate,
        changes: &Changes,
    ) -> Result<u64, Error> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(schema, filter, changes).await
    }

    async fn delete(&self, schema: &TableSchema, filter: &Predicate) -> Result<u64, Error> {
        self.inner.delete(schema, filter).await
    }
}

/// Memory-backed context plus a directly-callable scheduler
pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub engine: Arc<dyn StorageEngine>,
    pub queue: Arc<dyn Queue>,
    pub scheduler: Arc<Scheduler>,
}

impl TestApp {
    /// Memory engine + inline queue + the given runner
    pub async fn with_runner(runner: Arc<dyn Runner>) -> Self {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        let queue: Arc<dyn Queue> = Arc::new(InlineQueue::new());
        Self::build(engine, queue, runner).await
    }

    /// Wire a context from explicit parts, with a test config whose
    /// log directory lives under the system temp dir
    pub async fn build(
        engine: Arc<dyn StorageEngine>,
        queue: Arc<dyn Queue>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        let config = AppConfig {
            database_url: "sqlite://:memory:".to_string(),
            log_dir: std::env::temp_dir().join(format!("ferry-test-{}", new_uuid())),
            inline_tasks: true,
            debug: false,
        };
        let ctx = AppContext::initialize(config.clone(), engine.clone(), queue.clone(), runner.clone())
            .await
            .expect("test context");
        let scheduler = Arc::new(Scheduler::new(
            engine.clone(),
            queue.clone(),
            runner,
            config,
        ));
        Self {
            ctx,
            engine,
            queue,
            scheduler,
        }
    }

    pub fn databases(&self) -> Store<Database> {
        self.ctx.databases()
    }

    pub fn workflows(&self) -> Store<Workflow> {
        self.ctx.workflows()
    }

    pub fn jobs(&self) -> Store<Job> {
        self.ctx.jobs()
    }

    /// Create a workflow through the hooked store
    pub async fn add_workflow(&self, value: Value) -> Record {
        self.workflows()
            .add(record(value))
            .await
            .expect("add workflow")
    }
}
