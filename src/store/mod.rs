//! Generic record store
//!
//! A [`Store`] is a schema-declared table accessor over a pluggable
//! [`StorageEngine`]. It injects the cross-cutting behavior every
//! entity needs (synthetic UUID identifiers, created/updated
//! stamping, insert defaults, a JSON codec applied exactly once at
//! the storage boundary) and runs the lifecycle hooks attached at
//! construction, so call sites stay plain CRUD.
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry::store::{Predicate, Store};
//! use ferry::models::Database;
//!
//! let databases = Store::<Database>::new(engine.clone());
//! let row = databases.add(record).await?;
//! let found = databases.query().key("reporting").one().await?;
//! ```

pub mod engine;
pub mod hooks;
pub mod memory;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod sql;

pub use engine::StorageEngine;
pub use hooks::{NoHooks, StoreHooks};
pub use memory::MemoryEngine;
pub use predicate::{Assign, Changes, Compare, Operand, Predicate, SelectSpec, SortOrder};
pub use query::{Query, QueryState};
pub use schema::{new_uuid, now, Column, ColumnType, IdShape, TableSchema};
pub use sql::SqlEngine;

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;

/// One row, keyed by column name
pub type Record = serde_json::Map<String, Value>;

/// A table-backed entity: name plus schema declaration
pub trait Entity: Send + Sync + 'static {
    /// Table name
    const TABLE: &'static str;

    /// The table's schema declaration
    fn schema() -> TableSchema;
}

/// Schema-driven table accessor
pub struct Store<E: Entity> {
    engine: Arc<dyn StorageEngine>,
    schema: TableSchema,
    hooks: Arc<dyn StoreHooks>,
    _marker: PhantomData<E>,
}

impl<E: Entity> Clone for Store<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            schema: self.schema.clone(),
            hooks: self.hooks.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> Store<E> {
    /// Create a store with no hooks
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self::with_hooks(engine, Arc::new(NoHooks))
    }

    /// Create a store with a hook set.
    ///
    /// The hook set is fixed for the store's lifetime; capability
    /// checks like [`StoreHooks::needs_old_record`] are part of the
    /// set, not discovered per call.
    pub fn with_hooks(engine: Arc<dyn StorageEngine>, hooks: Arc<dyn StoreHooks>) -> Self {
        Self {
            engine,
            schema: E::schema(),
            hooks,
            _marker: PhantomData,
        }
    }

    /// The store's schema
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The underlying storage engine
    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        self.engine.clone()
    }

    /// Create the table if it does not exist
    pub async fn apply_schema(&self) -> Result<(), Error> {
        self.engine.apply_schema(&self.schema).await
    }

    /// Start a query
    pub fn query(&self) -> Query<'_, E> {
        Query::new(self)
    }

    /// Start a query targeting a row by id or unique name
    pub fn key(&self, key: impl Into<String>) -> Query<'_, E> {
        self.query().key(key)
    }

    /// Fetch a row by id or unique name
    pub async fn find(&self, key: impl Into<String>) -> Result<Record, Error> {
        self.query().key(key).one().await
    }

    /// Insert a row.
    ///
    /// Missing columns with schema defaults are filled in, a UUID is
    /// generated for an absent id, and created/updated are stamped.
    /// The row is re-fetched after insert, by id when present and
    /// otherwise by unique name, since the engine may not return
    /// inserted rows.
    pub async fn add(&self, values: Record) -> Result<Record, Error> {
        let mut state = QueryState {
            values: Some(values),
            ..QueryState::default()
        };
        self.hooks.pre_add(&mut state).await?;

        let mut values = state.values.clone().unwrap_or_default();
        for column in &self.schema.columns {
            if let Some(default) = &column.default {
                if !values.contains_key(column.name) {
                    values.insert(column.name.to_string(), default.clone());
                }
            }
        }
        if self.schema.generate_id {
            if let Some(id_column) = self.schema.id_column {
                let missing = matches!(values.get(id_column), None | Some(Value::Null));
                if missing {
                    values.insert(id_column.to_string(), Value::String(new_uuid()));
                }
            }
        }
        let stamp = now();
        if let Some(created) = self.schema.created_column {
            values.insert(created.to_string(), Value::String(stamp.clone()));
        }
        if let Some(updated) = self.schema.updated_column {
            values.insert(updated.to_string(), Value::String(stamp));
        }

        self.hooks.before_add_record(&mut values).await?;

        let id_value = self
            .schema
            .id_column
            .and_then(|c| values.get(c))
            .filter(|v| !v.is_null())
            .cloned();
        let name_value = self
            .schema
            .name_column
            .and_then(|c| values.get(c))
            .filter(|v| !v.is_null())
            .cloned();

        let stored = self.encode_record(values.clone());
        state.values = Some(values);
        self.engine.insert(&self.schema, vec![stored]).await?;

        let refetch = if let (Some(id_column), Some(id)) = (self.schema.id_column, id_value) {
            Predicate::eq(id_column, id)
        } else if let (Some(name_column), Some(name)) = (self.schema.name_column, name_value) {
            Predicate::eq(name_column, name)
        } else {
            return Err(Error::validation(
                "id",
                format!(
                    "inserted '{}' row has neither id nor name to re-resolve it",
                    self.schema.table
                ),
            ));
        };
        let mut record = self.fetch_one(Some(refetch), None).await?;

        self.hooks.after_add_record(&record).await?;
        self.hooks.post_add(&state, &mut record).await?;
        Ok(record)
    }

    pub(crate) fn key_predicate(&self, key: &str) -> Result<Predicate, Error> {
        if self.schema.is_id(key) {
            // is_id is only true when an id column exists
            Ok(Predicate::eq(self.schema.id_column.unwrap(), key))
        } else if let Some(name_column) = self.schema.name_column {
            Ok(Predicate::eq(name_column, key))
        } else {
            Err(Error::validation(
                "key",
                format!(
                    "table '{}' has no column to resolve key '{}' against",
                    self.schema.table, key
                ),
            ))
        }
    }

    pub(crate) async fn execute_one(&self, mut state: QueryState) -> Result<Record, Error> {
        self.hooks.pre_get(&mut state).await?;
        let predicate = state.predicate(self)?;
        let record = self.fetch_one(predicate, state.key.clone()).await?;

        let mut records = vec![record];
        self.hooks.post_get(&state, &mut records).await?;
        records
            .pop()
            .ok_or_else(|| Error::not_found(self.schema.table, state.key.unwrap_or_default()))
    }

    pub(crate) async fn execute_all(&self, mut state: QueryState) -> Result<Vec<Record>, Error> {
        self.hooks.pre_get(&mut state).await?;
        let spec = SelectSpec {
            filter: state.predicate(self)?,
            limit: state.limit,
            order_by: state.order_by.clone(),
        };
        let rows = self.engine.select(&self.schema, &spec).await?;
        let mut records: Vec<Record> = rows
            .into_iter()
            .map(|r| self.decode_record(r))
            .collect::<Result<_, _>>()?;
        self.hooks.post_get(&state, &mut records).await?;
        Ok(records)
    }

    pub(crate) async fn execute_set(&self, mut state: QueryState) -> Result<Record, Error> {
        self.hooks.pre_set(&mut state).await?;

        let predicate = self.required_predicate(&state, "set")?;
        let mut changes = state.changes.clone().unwrap_or_default();

        let name_changed = self
            .schema
            .name_column
            .map(|c| changes.contains(c))
            .unwrap_or(false);
        let old = if self.hooks.needs_old_record() || name_changed {
            Some(self.fetch_one(Some(predicate.clone()), state.key.clone()).await?)
        } else {
            None
        };

        if let Some(updated) = self.schema.updated_column {
            changes.insert(updated, Assign::Value(Value::String(now())));
        }
        self.hooks.before_set_record(old.as_ref(), &mut changes).await?;

        let stored = self.encode_changes(changes);
        self.engine.update(&self.schema, &predicate, &stored).await?;

        // after a name change the old key may be stale; go by id
        let refetch = match (&old, name_changed, self.schema.id_column) {
            (Some(old_record), true, Some(id_column)) => {
                let id = old_record.get(id_column).cloned().ok_or_else(|| {
                    Error::validation(
                        id_column,
                        format!("'{}' row has no id to re-fetch by", self.schema.table),
                    )
                })?;
                Predicate::eq(id_column, id)
            }
            _ => predicate,
        };
        let mut record = self.fetch_one(Some(refetch), state.key.clone()).await?;

        self.hooks.after_set_record(old.as_ref(), &record).await?;
        self.hooks.post_set(&state, &mut record).await?;
        Ok(record)
    }

    pub(crate) async fn execute_apply(&self, mut state: QueryState) -> Result<u64, Error> {
        self.hooks.pre_set(&mut state).await?;

        let predicate = self.required_predicate(&state, "apply")?;
        let mut changes = state.changes.clone().unwrap_or_default();
        if let Some(updated) = self.schema.updated_column {
            changes.insert(updated, Assign::Value(Value::String(now())));
        }
        let stored = self.encode_changes(changes);
        self.engine.update(&self.schema, &predicate, &stored).await
    }

    pub(crate) async fn execute_delete(&self, mut state: QueryState) -> Result<u64, Error> {
        self.hooks.pre_delete(&mut state).await?;
        let predicate = self.required_predicate(&state, "delete")?;
        let count = self.engine.delete(&self.schema, &predicate).await?;
        self.hooks.post_delete(&state).await?;
        Ok(count)
    }

    fn required_predicate(&self, state: &QueryState, verb: &str) -> Result<Predicate, Error> {
        state.predicate(self)?.ok_or_else(|| {
            Error::validation(
                "filter",
                format!("refusing unfiltered {} on '{}'", verb, self.schema.table),
            )
        })
    }

    async fn fetch_one(
        &self,
        predicate: Option<Predicate>,
        key: Option<String>,
    ) -> Result<Record, Error> {
        let spec = SelectSpec {
            filter: predicate.clone(),
            limit: Some(2),
            order_by: None,
        };
        let mut rows = self.engine.select(&self.schema, &spec).await?;
        match rows.len() {
            1 => self.decode_record(rows.remove(0)),
            0 => Err(Error::NotFound {
                entity: self.schema.table.to_string(),
                key: key.unwrap_or_else(|| format!("{:?}", predicate)),
            }),
            n => Err(Error::AmbiguousLookup {
                entity: self.schema.table.to_string(),
                matches: n,
            }),
        }
    }

    /// Encode JSON columns to their stored string form
    fn encode_record(&self, mut record: Record) -> Record {
        for column in &self.schema.columns {
            if column.ty != ColumnType::Json {
                continue;
            }
            if let Some(value) = record.get(column.name) {
                if !value.is_null() {
                    let encoded = value.to_string();
                    record.insert(column.name.to_string(), Value::String(encoded));
                }
            }
        }
        record
    }

    fn encode_changes(&self, changes: Changes) -> Changes {
        let mut out = Changes::new();
        for (column, assign) in changes.iter() {
            let assign = match assign {
                Assign::Value(value) if self.schema.is_json(column) && !value.is_null() => {
                    Assign::Value(Value::String(value.to_string()))
                }
                other => other.clone(),
            };
            out.insert(column.clone(), assign);
        }
        out
    }

    /// Decode JSON columns from their stored string form
    fn decode_record(&self, mut record: Record) -> Result<Record, Error> {
        for column in &self.schema.columns {
            if column.ty != ColumnType::Json {
                continue;
            }
            if let Some(Value::String(stored)) = record.get(column.name) {
                let decoded: Value = serde_json::from_str(stored).map_err(|e| {
                    Error::storage(format!(
                        "corrupt JSON in {}.{}: {}",
                        self.schema.table, column.name, e
                    ))
                })?;
                record.insert(column.name.to_string(), decoded);
            }
        }
        Ok(record)
    }
}
