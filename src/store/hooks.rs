//! Store lifecycle hooks
//!
//! Cross-cutting behavior attaches to a store at construction through
//! one hook set implementing [`StoreHooks`]. Every method has a no-op
//! default, so an entity overrides only the verbs it cares about,
//! the same shape sea-orm gives `ActiveModelBehavior`.
//!
//! The record-level set hooks can receive the previous row. Fetching
//! it costs a read, so it only happens when the hook set declares the
//! capability via [`StoreHooks::needs_old_record`].

use async_trait::async_trait;

use crate::error::Error;
use crate::store::predicate::Changes;
use crate::store::query::QueryState;
use crate::store::Record;

/// Lifecycle hooks for one store
#[async_trait]
pub trait StoreHooks: Send + Sync {
    /// Runs before an insert; may mutate the pending query state
    async fn pre_add(&self, query: &mut QueryState) -> Result<(), Error> {
        let _ = query;
        Ok(())
    }

    /// Runs after an insert; may replace the returned record
    async fn post_add(&self, query: &QueryState, record: &mut Record) -> Result<(), Error> {
        let _ = (query, record);
        Ok(())
    }

    /// Runs before a read; may mutate the pending query state
    async fn pre_get(&self, query: &mut QueryState) -> Result<(), Error> {
        let _ = query;
        Ok(())
    }

    /// Runs after a read; may replace the returned rows
    async fn post_get(&self, query: &QueryState, records: &mut Vec<Record>) -> Result<(), Error> {
        let _ = (query, records);
        Ok(())
    }

    /// Runs before an update; may mutate the pending query state
    async fn pre_set(&self, query: &mut QueryState) -> Result<(), Error> {
        let _ = query;
        Ok(())
    }

    /// Runs after an update; may replace the returned record
    async fn post_set(&self, query: &QueryState, record: &mut Record) -> Result<(), Error> {
        let _ = (query, record);
        Ok(())
    }

    /// Runs before a delete; may mutate the pending query state
    async fn pre_delete(&self, query: &mut QueryState) -> Result<(), Error> {
        let _ = query;
        Ok(())
    }

    /// Runs after a delete
    async fn post_delete(&self, query: &QueryState) -> Result<(), Error> {
        let _ = query;
        Ok(())
    }

    /// Whether the set hooks want the previous row. When false the
    /// store skips the extra read on the update path.
    fn needs_old_record(&self) -> bool {
        false
    }

    /// Runs on insert with the fully-resolved values (synthetic id,
    /// stamps and defaults already injected); may mutate them
    async fn before_add_record(&self, values: &mut Record) -> Result<(), Error> {
        let _ = values;
        Ok(())
    }

    /// Runs after an insert with the re-fetched row
    async fn after_add_record(&self, record: &Record) -> Result<(), Error> {
        let _ = record;
        Ok(())
    }

    /// Runs on update with the previous row (when
    /// [`Self::needs_old_record`] is true) and the pending changes
    async fn before_set_record(
        &self,
        old: Option<&Record>,
        changes: &mut Changes,
    ) -> Result<(), Error> {
        let _ = (old, changes);
        Ok(())
    }

    /// Runs after an update with the previous and updated rows
    async fn after_set_record(
        &self,
        old: Option<&Record>,
        new: &Record,
    ) -> Result<(), Error> {
        let _ = (old, new);
        Ok(())
    }
}

/// The empty hook set
pub struct NoHooks;

#[async_trait]
impl StoreHooks for NoHooks {}
