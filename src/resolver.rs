//! Step resolver
//!
//! Translates a workflow's step list into executable form by
//! replacing database id/name references in `source`/`target` with
//! literal connection urls. Values that already look like urls pass
//! through untouched. Lookups are memoized for the duration of one
//! `resolve` call only, since database rows may change between runs;
//! nothing is cached across invocations.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::models::{Database, Step};
use crate::store::{StorageEngine, Store};

/// Syntactic url check: an RFC 3986 scheme followed by a colon, so
/// both `postgres://host/db` and `file:local` pass
pub fn is_url(value: &str) -> bool {
    let Some(colon) = value.find(':') else {
        return false;
    };
    let scheme = &value[..colon];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolves step references against the database table
pub struct StepResolver {
    databases: Store<Database>,
}

impl StepResolver {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            databases: Store::new(engine),
        }
    }

    /// Resolve every `source`/`target` reference in `steps`.
    ///
    /// An unknown reference fails the whole resolution; no step is
    /// silently dropped.
    pub async fn resolve(&self, steps: &[Step]) -> Result<Vec<Step>, Error> {
        let mut memo: HashMap<String, String> = HashMap::new();
        let mut resolved = steps.to_vec();

        for (index, step) in resolved.iter_mut().enumerate() {
            step.source = self
                .resolve_reference(&mut memo, index, "source", &step.source)
                .await?;
            if let Some(target) = step.target.clone() {
                step.target = Some(
                    self.resolve_reference(&mut memo, index, "target", &target)
                        .await?,
                );
            }
        }
        Ok(resolved)
    }

    async fn resolve_reference(
        &self,
        memo: &mut HashMap<String, String>,
        step: usize,
        field: &'static str,
        reference: &str,
    ) -> Result<String, Error> {
        if is_url(reference) {
            return Ok(reference.to_string());
        }
        if let Some(url) = memo.get(reference) {
            return Ok(url.clone());
        }

        let record = self.databases.find(reference).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::StepResolution {
                step,
                field,
                reference: reference.to_string(),
            },
            other => other,
        })?;
        let url = record
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::storage(format!("database '{}' has no url", reference)))?
            .to_string();

        memo.insert(reference.to_string(), url.clone());
        Ok(url)
    }
}
