//! Schedulable workflows
//!
//! A `Workflow` names an ordered step list against registered
//! databases plus the policy knobs the scheduler reads: retry budget,
//! timeout, concurrency cap, cooldown, and an optional creation-time
//! schedule. The hook set validates incoming values, triggers
//! scheduling on create, and revokes pending queue handles when a
//! workflow is re-scheduled or deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::queue::{Queue, TaskHandle, WORKFLOW_EXECUTE};
use crate::store::{
    Assign, Changes, Column, Entity, QueryState, Record, StorageEngine, Store, StoreHooks,
    TableSchema,
};

/// One operation within a workflow
///
/// `source` and `target` hold a database id, a unique database name,
/// or a literal connection url; the resolver substitutes urls before
/// execution. Type-specific fields ride along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Creation-time schedule of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schedule {
    /// `{"immediate": true}`: run once right away
    Immediate { immediate: bool },
    /// `{"delay": "5 minutes"}`: run once after the delay
    Delay { delay: String },
    /// `{"cron": ["*", "*", "*", "*", "0", "1"]}`: recurring; the
    /// dispatch beat is owned by the external queue
    Cron { cron: Vec<String> },
}

impl Schedule {
    /// Check the schedule's fields without dispatching anything
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Immediate { .. } => Ok(()),
            Self::Delay { delay } => parse_duration(delay).map(|_| ()),
            Self::Cron { cron } => {
                if !(5..=6).contains(&cron.len()) || cron.iter().any(|f| f.trim().is_empty()) {
                    return Err(Error::validation(
                        "schedule",
                        format!("invalid cron fields: {:?}", cron),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Parse a duration of the form `"<positive integer> <unit>"` where
/// unit is `second(s)`, `minute(s)`, `hour(s)` or `day(s)`
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let invalid = || {
        Error::validation(
            "delay",
            format!(
                "invalid duration '{}': expected '<positive integer> <second(s)|minute(s)|hour(s)|day(s)>'",
                input
            ),
        )
    };

    let parts: Vec<&str> = input.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(invalid());
    }
    let amount: u64 = parts[0].parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }
    let unit_seconds = match parts[1] {
        "second" | "seconds" => 1,
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3600,
        "day" | "days" => 86400,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(amount * unit_seconds))
}

/// A named, schedulable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    pub steps: Vec<Step>,
    /// -1 retries forever, 0 never retries, N retries N times
    #[serde(default)]
    pub max_retries: i64,
    /// Consecutive failures; reset to 0 on success
    #[serde(default)]
    pub recent_errors: i64,
    /// Wall-clock limit in seconds; 0 means unlimited
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Handle of the pending queued invocation, for revocation
    #[serde(default)]
    pub task_id: Option<String>,
    /// Live concurrency counter
    #[serde(default)]
    pub running_jobs: i64,
    /// Cap on simultaneous running jobs; 0 means unlimited
    #[serde(default)]
    pub concurrency: i64,
    /// Minimum gap in seconds between a completed run and the next
    /// start, read by the recurring trigger
    #[serde(default)]
    pub cooldown: i64,
    pub created: String,
    pub updated: String,
}

impl Entity for Workflow {
    const TABLE: &'static str = "workflow";

    fn schema() -> TableSchema {
        TableSchema::new(Self::TABLE)
            .id_uuid("id")
            .unique_name("name")
            .column(Column::boolean("paused").default_value(false))
            .column(Column::json("steps"))
            .column(Column::integer("max_retries").default_value(0))
            .column(Column::integer("recent_errors").default_value(0))
            .column(Column::integer("timeout").default_value(0))
            .column(Column::json("schedule").nullable())
            .column(Column::text("task_id").nullable())
            .column(Column::integer("running_jobs").default_value(0))
            .column(Column::integer("concurrency").default_value(0))
            .column(Column::integer("cooldown").default_value(0))
            .timestamps()
    }
}

impl Workflow {
    /// Deserialize a store record into a typed model
    pub fn from_record(record: &Record) -> Result<Self, Error> {
        serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| Error::validation("workflow", e.to_string()))
    }
}

pub(crate) fn parse_steps(value: &Value) -> Result<Vec<Step>, Error> {
    let steps: Vec<Step> = serde_json::from_value(value.clone())
        .map_err(|e| Error::validation("steps", format!("expected an array of steps: {}", e)))?;
    for (index, step) in steps.iter().enumerate() {
        if step.kind.trim().is_empty() {
            return Err(Error::validation(
                "steps",
                format!("step {} has an empty type", index),
            ));
        }
        if step.source.trim().is_empty() {
            return Err(Error::validation(
                "steps",
                format!("step {} has an empty source", index),
            ));
        }
        if matches!(&step.target, Some(t) if t.trim().is_empty()) {
            return Err(Error::validation(
                "steps",
                format!("step {} has an empty target", index),
            ));
        }
    }
    Ok(steps)
}

pub(crate) fn parse_schedule(value: &Value) -> Result<Option<Schedule>, Error> {
    if value.is_null() {
        return Ok(None);
    }
    let schedule: Schedule = serde_json::from_value(value.clone()).map_err(|_| {
        Error::validation(
            "schedule",
            format!(
                "expected {{\"immediate\"}}, {{\"delay\"}} or {{\"cron\"}}, got {}",
                value
            ),
        )
    })?;
    schedule.validate()?;
    Ok(Some(schedule))
}

fn check_bounds(field: &'static str, value: &Value, minimum: i64) -> Result<(), Error> {
    let number = value
        .as_i64()
        .ok_or_else(|| Error::validation(field, format!("expected an integer, got {}", value)))?;
    if number < minimum {
        return Err(Error::validation(
            field,
            format!("must be >= {}, got {}", minimum, number),
        ));
    }
    Ok(())
}

fn validate_values(values: &Record) -> Result<(), Error> {
    if let Some(name) = values.get("name") {
        if !matches!(name, Value::String(s) if !s.trim().is_empty()) {
            return Err(Error::validation("name", "must be a non-empty string"));
        }
    }
    if let Some(steps) = values.get("steps") {
        parse_steps(steps)?;
    }
    if let Some(schedule) = values.get("schedule") {
        parse_schedule(schedule)?;
    }
    if let Some(value) = values.get("max_retries") {
        check_bounds("max_retries", value, -1)?;
    }
    for field in ["timeout", "concurrency", "cooldown"] {
        if let Some(value) = values.get(field) {
            check_bounds(field, value, 0)?;
        }
    }
    Ok(())
}

/// Hook set of the workflow store: validation, scheduling-on-create,
/// and revocation of pending queue handles
pub struct WorkflowHooks {
    engine: Arc<dyn StorageEngine>,
    queue: Arc<dyn Queue>,
}

impl WorkflowHooks {
    pub fn new(engine: Arc<dyn StorageEngine>, queue: Arc<dyn Queue>) -> Self {
        Self { engine, queue }
    }

    /// Hook-free store view for system writes, so persisting a task
    /// handle does not re-enter these hooks
    fn plain_store(&self) -> Store<Workflow> {
        Store::new(self.engine.clone())
    }

    async fn revoke_pending(&self, record: &Record) -> Result<(), Error> {
        if let Some(Value::String(task_id)) = record.get("task_id") {
            self.queue.revoke(&TaskHandle::from_id(task_id)).await?;
        }
        Ok(())
    }

    /// Inspect a workflow's schedule and dispatch through the queue:
    /// immediate schedules enqueue an attempt now, delayed schedules
    /// park one; the returned handle is persisted for revocation.
    async fn dispatch_schedule(&self, record: &Record) -> Result<(), Error> {
        let schedule = match record.get("schedule") {
            Some(value) => parse_schedule(value)?,
            None => None,
        };
        let Some(schedule) = schedule else {
            return Ok(());
        };
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("id", "workflow record has no id"))?
            .to_string();
        let args = json!({ "workflow_id": id });

        let handle = match schedule {
            Schedule::Immediate { immediate: true } => {
                Some(self.queue.enqueue(WORKFLOW_EXECUTE, args).await?)
            }
            Schedule::Immediate { .. } => None,
            Schedule::Delay { delay } => {
                let duration = parse_duration(&delay)?;
                Some(
                    self.queue
                        .schedule_after(WORKFLOW_EXECUTE, args, duration)
                        .await?,
                )
            }
            // recurring dispatch is owned by the queue's periodic beat
            Schedule::Cron { .. } => None,
        };

        if let Some(handle) = handle {
            self.plain_store()
                .key(&id)
                .values(Changes::new().set("task_id", handle.id()))
                .apply()
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreHooks for WorkflowHooks {
    async fn before_add_record(&self, values: &mut Record) -> Result<(), Error> {
        if !values.contains_key("name") {
            return Err(Error::validation("name", "is required"));
        }
        if !values.contains_key("steps") {
            return Err(Error::validation("steps", "is required"));
        }
        validate_values(values)
    }

    async fn after_add_record(&self, record: &Record) -> Result<(), Error> {
        self.dispatch_schedule(record).await
    }

    fn needs_old_record(&self) -> bool {
        true
    }

    async fn before_set_record(
        &self,
        old: Option<&Record>,
        changes: &mut Changes,
    ) -> Result<(), Error> {
        let mut pending = Record::new();
        for (column, assign) in changes.iter() {
            if let Assign::Value(value) = assign {
                pending.insert(column.clone(), value.clone());
            }
        }
        validate_values(&pending)?;

        // a re-scheduled workflow must not keep a stale pending task
        if changes.contains("schedule") {
            if let Some(old) = old {
                self.revoke_pending(old).await?;
            }
        }
        Ok(())
    }

    async fn after_set_record(&self, old: Option<&Record>, new: &Record) -> Result<(), Error> {
        let schedule_changed = match old {
            Some(old) => old.get("schedule") != new.get("schedule"),
            None => false,
        };
        if schedule_changed {
            self.dispatch_schedule(new).await?;
        }
        Ok(())
    }

    async fn pre_delete(&self, query: &mut QueryState) -> Result<(), Error> {
        let doomed = self.plain_store().execute_all(query.clone()).await?;
        for record in &doomed {
            self.revoke_pending(record).await?;
        }
        Ok(())
    }
}
