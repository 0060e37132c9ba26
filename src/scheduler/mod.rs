//! Workflow scheduler
//!
//! Executes one attempt per invocation: load the workflow, admit it
//! under the concurrency cap, record a job row, run the resolved
//! steps through the runner with the workflow's wall-clock timeout,
//! record the outcome, and schedule a backoff retry when the budget
//! allows.
//!
//! Admission and the `running_jobs` increment are one conditional
//! update (`running_jobs = running_jobs + 1` only while below the
//! cap), so two attempts admitted in the same instant cannot both
//! slip under the limit. Zero affected rows is the rejection, which
//! is recorded as a terminal job, never raised.
//!
//! Every admitted attempt reaches a terminal job state: resolution
//! failures, runner errors, and timeouts are captured into the job's
//! `result`, and `running_jobs` is decremented exactly once.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::error::{Error, RunnerError};
use crate::models::{Job, JobStatus, Workflow};
use crate::queue::{Queue, TaskHandler, WORKFLOW_EXECUTE};
use crate::resolver::StepResolver;
use crate::runner::{LogSink, Runner};
use crate::store::{new_uuid, now, Changes, Predicate, Record, StorageEngine, Store};

/// One-attempt-at-a-time workflow executor, registered as the
/// queue's task handler at context initialization
pub struct Scheduler {
    engine: Arc<dyn StorageEngine>,
    queue: Arc<dyn Queue>,
    runner: Arc<dyn Runner>,
    config: AppConfig,
}

impl Scheduler {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        queue: Arc<dyn Queue>,
        runner: Arc<dyn Runner>,
        config: AppConfig,
    ) -> Self {
        Self {
            engine,
            queue,
            runner,
            config,
        }
    }

    // system writes go through hook-free store views so counter
    // updates never re-enter the user-facing workflow hooks
    fn workflows(&self) -> Store<Workflow> {
        Store::new(self.engine.clone())
    }

    fn jobs(&self) -> Store<Job> {
        Store::new(self.engine.clone())
    }

    fn log_path(&self, workflow_id: &str, job_id: &str) -> PathBuf {
        self.config
            .log_dir
            .join(format!("W_{}_J_{}.log", workflow_id, job_id))
    }

    /// Execute one attempt of the workflow named by id or unique name.
    ///
    /// Returns silently when the workflow no longer exists: it may
    /// have been deleted after this attempt was scheduled, and there
    /// is nothing left to log against.
    pub async fn attempt(&self, workflow_ref: &str) -> Result<(), Error> {
        let workflows = self.workflows();
        let record = match workflows.find(workflow_ref).await {
            Ok(record) => record,
            Err(Error::NotFound { .. }) => {
                tracing::debug!(workflow = workflow_ref, "workflow gone before attempt");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let workflow = Workflow::from_record(&record)?;
        let jobs = self.jobs();

        let admitted = workflows
            .key(&workflow.id)
            .filter(Predicate::or(vec![
                Predicate::eq("concurrency", 0),
                Predicate::lt_col("running_jobs", "concurrency"),
            ]))
            .values(Changes::new().increment("running_jobs", 1))
            .apply()
            .await?;

        if admitted == 0 {
            tracing::warn!(
                workflow = %workflow.name,
                limit = workflow.concurrency,
                "attempt rejected at concurrency limit"
            );
            let stamp = now();
            let mut values = Record::new();
            values.insert("workflow_id".into(), json!(workflow.id));
            values.insert("status".into(), json!(JobStatus::Failed.as_str()));
            values.insert(
                "result".into(),
                Job::error_result(
                    "ConcurrencyError",
                    &format!("At concurrency limit: {}", workflow.concurrency),
                ),
            );
            values.insert("started".into(), json!(stamp));
            values.insert("completed".into(), json!(stamp));
            jobs.add(values).await?;
            return Ok(());
        }

        let job_id = new_uuid();
        let log_path = self.log_path(&workflow.id, &job_id);
        let mut values = Record::new();
        values.insert("id".into(), json!(job_id));
        values.insert("workflow_id".into(), json!(workflow.id));
        values.insert("status".into(), json!(JobStatus::Started.as_str()));
        values.insert("started".into(), json!(now()));
        values.insert("log".into(), json!(log_path.to_string_lossy()));
        if let Err(e) = jobs.add(values).await {
            // the attempt never ran; give the admission slot back
            let _ = workflows
                .key(&workflow.id)
                .values(Changes::new().decrement("running_jobs", 1))
                .apply()
                .await;
            return Err(e);
        }

        tracing::info!(workflow = %workflow.name, job = %job_id, "attempt started");
        let outcome = self.run_attempt(&workflow, &log_path).await;
        self.finish_attempt(&workflow, &job_id, outcome).await
    }

    /// Resolve and run the steps; every failure collapses into the
    /// error-typed outcome recorded on the job
    async fn run_attempt(
        &self,
        workflow: &Workflow,
        log_path: &Path,
    ) -> Result<Value, RunnerError> {
        match self.execute_runner(workflow, log_path).await {
            Ok(value) => Ok(value),
            Err(Error::Runner(e)) => Err(e),
            Err(other) => Err(RunnerError::new(other.kind(), other.to_string())),
        }
    }

    async fn execute_runner(&self, workflow: &Workflow, log_path: &Path) -> Result<Value, Error> {
        let resolver = StepResolver::new(self.engine.clone());
        let steps = resolver.resolve(&workflow.steps).await?;

        let file = tokio::fs::File::create(log_path).await?;
        let mut sink: LogSink = Box::new(file);

        let invocation = self
            .runner
            .execute(&workflow.name, &steps, &mut sink, self.config.debug);
        if workflow.timeout > 0 {
            let limit = Duration::from_secs(workflow.timeout as u64);
            match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result.map_err(Error::Runner),
                // expiry drops and thereby cancels the runner future
                Err(_) => Err(Error::Runner(RunnerError::new(
                    "TimeoutError",
                    format!("workflow timed out after {} seconds", workflow.timeout),
                ))),
            }
        } else {
            invocation.await.map_err(Error::Runner)
        }
    }

    async fn finish_attempt(
        &self,
        workflow: &Workflow,
        job_id: &str,
        outcome: Result<Value, RunnerError>,
    ) -> Result<(), Error> {
        let workflows = self.workflows();
        let jobs = self.jobs();

        let success = outcome.is_ok();
        let (status, result) = match &outcome {
            Ok(data) => (JobStatus::Succeeded, Job::success_result(data.clone())),
            Err(e) => (JobStatus::Failed, Job::error_result(&e.kind, &e.message)),
        };

        let job_update = jobs
            .key(job_id)
            .values(
                Changes::new()
                    .set("status", status.as_str())
                    .set("result", result)
                    .set("completed", now()),
            )
            .apply()
            .await;

        let counters = if success {
            Changes::new()
                .set("recent_errors", 0)
                .decrement("running_jobs", 1)
        } else {
            Changes::new()
                .increment("recent_errors", 1)
                .decrement("running_jobs", 1)
        };
        let workflow_update = workflows.key(&workflow.id).values(counters).apply().await;

        match &outcome {
            Ok(_) => {
                tracing::info!(workflow = %workflow.name, job = %job_id, "attempt succeeded");
            }
            Err(e) => {
                tracing::warn!(
                    workflow = %workflow.name,
                    job = %job_id,
                    error = %e,
                    "attempt failed"
                );
                self.schedule_retry(workflow).await;
            }
        }

        job_update?;
        workflow_update?;
        Ok(())
    }

    /// Retry with exponential backoff keyed to the consecutive-error
    /// count: after the k-th straight failure the next attempt waits
    /// 2^k seconds. A scheduling failure is reported but never rolls
    /// back the recorded job outcome.
    async fn schedule_retry(&self, workflow: &Workflow) {
        let recent_errors = workflow.recent_errors + 1;
        let within_budget =
            workflow.max_retries == -1 || recent_errors <= workflow.max_retries;
        if !within_budget {
            tracing::info!(
                workflow = %workflow.name,
                recent_errors,
                max_retries = workflow.max_retries,
                "retry budget exhausted"
            );
            return;
        }

        let exponent = recent_errors.clamp(0, 63) as u32;
        let delay_secs = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let args = json!({ "workflow_id": workflow.id });
        match self
            .queue
            .schedule_after(WORKFLOW_EXECUTE, args, Duration::from_secs(delay_secs))
            .await
        {
            Ok(handle) => {
                tracing::info!(
                    workflow = %workflow.name,
                    delay_secs,
                    handle = %handle,
                    "retry scheduled"
                );
            }
            Err(e) => {
                tracing::error!(workflow = %workflow.name, "failed to schedule retry: {}", e);
            }
        }
    }
}

#[async_trait]
impl TaskHandler for Scheduler {
    async fn run(&self, task: &str, args: &Value) -> Result<(), Error> {
        match task {
            WORKFLOW_EXECUTE => {
                let workflow_id = args
                    .get("workflow_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::adapter(format!("{} task is missing workflow_id", WORKFLOW_EXECUTE))
                    })?;
                self.attempt(workflow_id).await
            }
            other => Err(Error::adapter(format!("unknown task '{}'", other))),
        }
    }
}
