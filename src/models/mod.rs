//! Entity models
//!
//! Schema declarations over the record store for the three tables:
//! registered connection targets ([`Database`]), schedulable
//! [`Workflow`]s, and their recorded execution attempts ([`Job`]).
//! The workflow model wires validation and scheduling-on-create
//! hooks; the other two are plain declarations.

pub mod database;
pub mod job;
pub mod workflow;

pub use database::Database;
pub use job::{Job, JobStatus};
pub use workflow::{parse_duration, Schedule, Step, Workflow, WorkflowHooks};

use crate::store::{Entity, TableSchema};

/// All model schemas, applied to the engine at startup
pub fn schemas() -> Vec<TableSchema> {
    vec![Database::schema(), Workflow::schema(), Job::schema()]
}
