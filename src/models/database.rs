//! Registered connection targets
//!
//! A `Database` row names a connection url that workflow steps can
//! reference by id or unique name. Rows are only changed through
//! explicit edits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::store::{Column, Entity, Record, TableSchema};

/// A registered connection target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Optional structured scope, e.g. which schemas a workflow may touch
    #[serde(default)]
    pub scope: Option<Value>,
    pub created: String,
    pub updated: String,
}

impl Entity for Database {
    const TABLE: &'static str = "database";

    fn schema() -> TableSchema {
        TableSchema::new(Self::TABLE)
            .id_uuid("id")
            .unique_name("name")
            .column(Column::text("url"))
            .column(Column::json("scope").nullable())
            .timestamps()
    }
}

impl Database {
    /// Deserialize a store record into a typed model
    pub fn from_record(record: &Record) -> Result<Self, Error> {
        serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| Error::validation("database", e.to_string()))
    }
}
