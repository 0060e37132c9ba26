//! Recorded execution attempts
//!
//! One `Job` row per attempt, never mutated after reaching a terminal
//! status except the final status/result/completed write. Jobs are
//! only deleted by explicit administrative action.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::store::{Column, Entity, Record, TableSchema};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Started,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Started => "Started",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "Queued" => Some(Self::Queued),
            "Started" => Some(Self::Started),
            "Succeeded" => Some(Self::Succeeded),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One recorded execution attempt of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub workflow_id: String,
    pub status: JobStatus,
    /// Path of the attempt's log file
    #[serde(default)]
    pub log: Option<String>,
    /// `{data: ...}` on success, `{error: {type, message}}` on failure
    #[serde(default)]
    pub result: Option<Value>,
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
}

impl Entity for Job {
    const TABLE: &'static str = "job";

    fn schema() -> TableSchema {
        TableSchema::new(Self::TABLE)
            .id_uuid("id")
            .column(Column::text("workflow_id"))
            .column(Column::text("status").default_value("Queued"))
            .column(Column::text("log").nullable())
            .column(Column::json("result").nullable())
            .timestamps()
            .column(Column::timestamp("started").nullable())
            .column(Column::timestamp("completed").nullable())
    }
}

impl Job {
    /// Deserialize a store record into a typed model
    pub fn from_record(record: &Record) -> Result<Self, Error> {
        serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| Error::validation("job", e.to_string()))
    }

    /// Result payload for a successful attempt
    pub fn success_result(data: Value) -> Value {
        json!({ "data": data })
    }

    /// Result payload for a failed attempt
    pub fn error_result(kind: &str, message: &str) -> Value {
        json!({ "error": { "type": kind, "message": message } })
    }
}
