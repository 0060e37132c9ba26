//! Query builder
//!
//! Every builder call returns a new immutable query state; nothing
//! executes until a terminal method runs. Key-based lookups
//! (`.key("...")`) are classified against the schema's id shape at
//! execution time, targeting the id column or the unique-name column.

use crate::error::Error;
use crate::store::predicate::{Changes, Predicate, SortOrder};
use crate::store::{Entity, Record, Store};

/// Pending state of one query
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    /// Boolean filter over the table
    pub filter: Option<Predicate>,
    /// Caller-supplied id-or-name key, resolved at execution
    pub key: Option<String>,
    /// Pending insert values
    pub values: Option<Record>,
    /// Pending update assignments
    pub changes: Option<Changes>,
    /// Row limit for reads
    pub limit: Option<u64>,
    /// Sort column and direction for reads
    pub order_by: Option<(String, SortOrder)>,
}

impl QueryState {
    /// Combine the filter and resolved key into one predicate
    pub(crate) fn predicate<E: Entity>(&self, store: &Store<E>) -> Result<Option<Predicate>, Error> {
        let mut parts = Vec::new();
        if let Some(key) = &self.key {
            parts.push(store.key_predicate(key)?);
        }
        if let Some(filter) = &self.filter {
            parts.push(filter.clone());
        }
        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Predicate::and(parts)),
        })
    }
}

/// A query against one store
///
/// # Example
///
/// ```rust,ignore
/// let workflow = workflows.query().key("nightly-sync").one().await?;
/// let failed = jobs
///     .query()
///     .filter(Predicate::eq("status", "Failed"))
///     .all()
///     .await?;
/// ```
pub struct Query<'a, E: Entity> {
    store: &'a Store<E>,
    state: QueryState,
}

impl<'a, E: Entity> Query<'a, E> {
    pub(crate) fn new(store: &'a Store<E>) -> Self {
        Self {
            store,
            state: QueryState::default(),
        }
    }

    /// Add a filter predicate; multiple filters combine with AND
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.state.filter = Some(match self.state.filter.take() {
            Some(existing) => Predicate::and(vec![existing, predicate]),
            None => predicate,
        });
        self
    }

    /// Target a row by id or unique name
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.state.key = Some(key.into());
        self
    }

    /// Attach the assignment set for `set()`/`apply()`
    pub fn values(mut self, changes: Changes) -> Self {
        self.state.changes = Some(changes);
        self
    }

    /// Limit the number of rows returned by `all()`
    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    /// Sort rows returned by `all()`
    pub fn sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.state.order_by = Some((column.into(), order));
        self
    }

    /// Fetch exactly one matching row.
    ///
    /// Fails with `NotFound` when nothing matches and
    /// `AmbiguousLookup` when more than one row does.
    pub async fn one(self) -> Result<Record, Error> {
        self.store.execute_one(self.state).await
    }

    /// Fetch all matching rows
    pub async fn all(self) -> Result<Vec<Record>, Error> {
        self.store.execute_all(self.state).await
    }

    /// Update the matching row and return it re-fetched.
    ///
    /// Stamps the `updated` column and runs the record-level set
    /// hooks. When the assignment changes the name column itself the
    /// re-fetch goes by id, never by the now-stale name.
    pub async fn set(self) -> Result<Record, Error> {
        self.store.execute_set(self.state).await
    }

    /// Update matching rows and return the affected count.
    ///
    /// Same stamping as `set()` but no record hooks and no re-fetch;
    /// this is the path for atomic counter updates where a zero count
    /// is meaningful (admission control).
    pub async fn apply(self) -> Result<u64, Error> {
        self.store.execute_apply(self.state).await
    }

    /// Delete matching rows. Zero matches is not an error.
    pub async fn delete(self) -> Result<u64, Error> {
        self.store.execute_delete(self.state).await
    }
}
