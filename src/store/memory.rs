//! In-memory storage engine
//!
//! Backs tests and embedded use. One mutex guards all tables, so
//! every operation, including relative-delta updates and the
//! conditional admission update, is atomic with respect to
//! concurrent callers.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::store::engine::StorageEngine;
use crate::store::predicate::{compare_values, Changes, Predicate, SelectSpec, SortOrder};
use crate::store::schema::TableSchema;
use crate::store::Record;

/// Mutex-guarded table map
pub struct MemoryEngine {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(filter: &Predicate, row: &Record) -> bool {
    filter.matches(row)
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn apply_schema(&self, schema: &TableSchema) -> Result<(), Error> {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(schema.table.to_string()).or_default();
        Ok(())
    }

    async fn insert(&self, schema: &TableSchema, rows: Vec<Record>) -> Result<u64, Error> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(schema.table.to_string()).or_default();

        for row in &rows {
            for unique in [schema.id_column, schema.name_column].into_iter().flatten() {
                let value = row.get(unique).unwrap_or(&Value::Null);
                if value.is_null() {
                    continue;
                }
                if table.iter().any(|existing| existing.get(unique) == Some(value)) {
                    return Err(Error::storage(format!(
                        "UNIQUE constraint failed: {}.{}",
                        schema.table, unique
                    )));
                }
            }
        }
        let count = rows.len() as u64;
        table.extend(rows);
        Ok(count)
    }

    async fn select(&self, schema: &TableSchema, spec: &SelectSpec) -> Result<Vec<Record>, Error> {
        let tables = self.tables.lock().unwrap();
        let table = match tables.get(schema.table) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };

        let mut rows: Vec<Record> = table
            .iter()
            .filter(|row| spec.filter.as_ref().map(|f| matches(f, row)).unwrap_or(true))
            .cloned()
            .collect();

        if let Some((column, order)) = &spec.order_by {
            rows.sort_by(|a, b| {
                let left = a.get(column.as_str()).unwrap_or(&Value::Null);
                let right = b.get(column.as_str()).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
                match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = spec.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn update(
        &self,
        schema: &TableSchema,
        filter: &Predicate,
        changes: &Changes,
    ) -> Result<u64, Error> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(schema.table.to_string()).or_default();

        let mut affected = 0;
        for row in table.iter_mut() {
            if matches(filter, row) {
                changes.apply_to(row);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, schema: &TableSchema, filter: &Predicate) -> Result<u64, Error> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(schema.table.to_string()).or_default();

        let before = table.len();
        table.retain(|row| !matches(filter, row));
        Ok((before - table.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::Column;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("counter")
            .id_uuid("id")
            .unique_name("name")
            .column(Column::integer("value").default_value(0))
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_insert_and_select() {
        let engine = MemoryEngine::new();
        let schema = schema();
        engine
            .insert(&schema, vec![record(json!({"id": "a", "name": "one", "value": 1}))])
            .await
            .unwrap();

        let rows = engine
            .select(
                &schema,
                &SelectSpec {
                    filter: Some(Predicate::eq("name", "one")),
                    ..SelectSpec::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], json!(1));
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let engine = MemoryEngine::new();
        let schema = schema();
        engine
            .insert(&schema, vec![record(json!({"id": "a", "name": "one"}))])
            .await
            .unwrap();

        let err = engine
            .insert(&schema, vec![record(json!({"id": "b", "name": "one"}))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[tokio::test]
    async fn test_conditional_update_counts() {
        let engine = MemoryEngine::new();
        let schema = schema();
        engine
            .insert(&schema, vec![record(json!({"id": "a", "name": "one", "value": 1}))])
            .await
            .unwrap();

        let filter = Predicate::and(vec![
            Predicate::eq("id", "a"),
            Predicate::lt("value", 2),
        ]);
        let changes = Changes::new().increment("value", 1);

        assert_eq!(engine.update(&schema, &filter, &changes).await.unwrap(), 1);
        assert_eq!(engine.update(&schema, &filter, &changes).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sort_and_limit() {
        let engine = MemoryEngine::new();
        let schema = schema();
        for (id, value) in [("a", 3), ("b", 1), ("c", 2)] {
            engine
                .insert(
                    &schema,
                    vec![record(json!({"id": id, "name": id, "value": value}))],
                )
                .await
                .unwrap();
        }

        let rows = engine
            .select(
                &schema,
                &SelectSpec {
                    filter: None,
                    limit: Some(2),
                    order_by: Some(("value".to_string(), SortOrder::Desc)),
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!("a"));
        assert_eq!(rows[1]["id"], json!("c"));
    }

    #[tokio::test]
    async fn test_delete_count() {
        let engine = MemoryEngine::new();
        let schema = schema();
        engine
            .insert(&schema, vec![record(json!({"id": "a", "name": "one"}))])
            .await
            .unwrap();

        let deleted = engine
            .delete(&schema, &Predicate::eq("id", "a"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        let deleted = engine
            .delete(&schema, &Predicate::eq("id", "a"))
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }
}
