//! Application context
//!
//! One `AppContext` is built at process start and passed by `Arc` to
//! everything that needs storage, queueing, or the runner. There is
//! no global handle: tests get isolation by constructing a fresh
//! context (and thereby a fresh engine) per test.
//!
//! Initialization applies every model schema, creates the log
//! directory, and registers the scheduler as the queue's task
//! handler, the only place the executing side of the queue is wired.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Error;
use crate::models::{self, Database, Job, Workflow, WorkflowHooks};
use crate::queue::{default_queue, Queue};
use crate::runner::Runner;
use crate::scheduler::Scheduler;
use crate::store::{SqlEngine, StorageEngine, Store};

/// Process-scoped dependencies, injected into every component
pub struct AppContext {
    config: AppConfig,
    engine: Arc<dyn StorageEngine>,
    queue: Arc<dyn Queue>,
    runner: Arc<dyn Runner>,
    workflow_hooks: Arc<WorkflowHooks>,
}

impl AppContext {
    /// Wire a context from explicit parts.
    ///
    /// Applies all model schemas, creates the log directory, and
    /// registers the scheduler on the queue.
    pub async fn initialize(
        config: AppConfig,
        engine: Arc<dyn StorageEngine>,
        queue: Arc<dyn Queue>,
        runner: Arc<dyn Runner>,
    ) -> Result<Arc<Self>, Error> {
        std::fs::create_dir_all(&config.log_dir)?;
        for schema in models::schemas() {
            engine.apply_schema(&schema).await?;
        }

        let workflow_hooks = Arc::new(WorkflowHooks::new(engine.clone(), queue.clone()));
        let scheduler = Arc::new(Scheduler::new(
            engine.clone(),
            queue.clone(),
            runner.clone(),
            config.clone(),
        ));
        queue.set_handler(scheduler);

        Ok(Arc::new(Self {
            config,
            engine,
            queue,
            runner,
            workflow_hooks,
        }))
    }

    /// Connect to the configured database and wire a context with the
    /// queue the config asks for
    pub async fn from_config(config: AppConfig, runner: Arc<dyn Runner>) -> Result<Arc<Self>, Error> {
        let engine: Arc<dyn StorageEngine> = Arc::new(SqlEngine::connect(&config.database_url).await?);
        let queue = default_queue(&config);
        Self::initialize(config, engine, queue, runner).await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        self.engine.clone()
    }

    pub fn queue(&self) -> Arc<dyn Queue> {
        self.queue.clone()
    }

    pub fn runner(&self) -> Arc<dyn Runner> {
        self.runner.clone()
    }

    /// Store over registered connection targets
    pub fn databases(&self) -> Store<Database> {
        Store::new(self.engine.clone())
    }

    /// Store over workflows, with validation/scheduling hooks attached
    pub fn workflows(&self) -> Store<Workflow> {
        Store::with_hooks(self.engine.clone(), self.workflow_hooks.clone())
    }

    /// Store over recorded jobs
    pub fn jobs(&self) -> Store<Job> {
        Store::new(self.engine.clone())
    }
}
