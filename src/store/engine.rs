//! Storage engine boundary
//!
//! The store consumes physical storage through this trait only. The
//! crate ships two implementations: [`crate::store::sql::SqlEngine`]
//! over sea-orm and [`crate::store::memory::MemoryEngine`] for tests
//! and embedded use.

use async_trait::async_trait;

use crate::error::Error;
use crate::store::predicate::{Changes, Predicate, SelectSpec};
use crate::store::schema::TableSchema;
use crate::store::Record;

/// Physical storage operations, schema-driven.
///
/// Engines receive and return rows in their stored form: JSON columns
/// are strings here; the store applies the codec above this boundary.
/// `update` must apply the whole assignment set, relative deltas
/// included, as one atomic operation.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Create the table if it does not exist
    async fn apply_schema(&self, schema: &TableSchema) -> Result<(), Error>;

    /// Insert rows, returning the inserted count
    async fn insert(&self, schema: &TableSchema, rows: Vec<Record>) -> Result<u64, Error>;

    /// Fetch rows matching the spec
    async fn select(&self, schema: &TableSchema, spec: &SelectSpec) -> Result<Vec<Record>, Error>;

    /// Update matching rows atomically, returning the affected count
    async fn update(
        &self,
        schema: &TableSchema,
        filter: &Predicate,
        changes: &Changes,
    ) -> Result<u64, Error>;

    /// Delete matching rows, returning the deleted count
    async fn delete(&self, schema: &TableSchema, filter: &Predicate) -> Result<u64, Error>;
}
