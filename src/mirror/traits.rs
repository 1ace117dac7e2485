use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::normalize::NormalizedRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Row not found")]
    NotFound,
    #[error("Mirror store backend error: {0}")]
    Backend(String),
}

/// One row in the mirror store, keyed by `(entity, source_id)`.
///
/// A row's absence means "not yet mirrored or deleted"; presence means
/// "last known normalized state of that source record". The mirror keeps no
/// history and no foreign keys; source relationships are flattened into
/// `data` as plain identifier strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEntity {
    /// Surrogate key, monotonically increasing, owned by the mirror store.
    pub id: i64,
    /// Logical entity name, e.g. `"User"`.
    pub entity: String,
    /// Stringified primary-store identifier.
    pub source_id: String,
    /// Fully normalized record.
    pub data: Value,
    /// Source audit timestamps (epoch millis). Observability and ordering
    /// heuristics only, never conflict resolution.
    pub source_created_at: Option<i64>,
    pub source_updated_at: Option<i64>,
    /// Mirror-owned audit timestamps (epoch millis).
    pub created_at: i64,
    pub updated_at: i64,
}

/// Current epoch millis, used for the mirror's own audit columns.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Mirror-store contract.
///
/// The only mutability the design requires of a backend is per-row upsert and
/// delete atomicity; no cross-row transactions.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get(
        &self,
        entity: &str,
        source_id: &str,
    ) -> Result<Option<StructuredEntity>, StoreError>;

    /// Insert or overwrite the row for `(entity, record.source_id)`.
    /// On overwrite, `data`, source timestamps and `updated_at` change;
    /// `id` and `created_at` are stable.
    async fn upsert(&self, entity: &str, record: &NormalizedRecord) -> Result<(), StoreError>;

    /// Bulk upsert with the same per-row semantics. Default implementation
    /// falls back to sequential upserts.
    async fn upsert_batch(
        &self,
        entity: &str,
        records: &[NormalizedRecord],
    ) -> Result<usize, StoreError> {
        for record in records {
            self.upsert(entity, record).await?;
        }
        Ok(records.len())
    }

    /// Remove the row for `(entity, source_id)`. Absent rows are a no-op.
    async fn delete(&self, entity: &str, source_id: &str) -> Result<(), StoreError>;

    async fn count_entity(&self, entity: &str) -> Result<u64, StoreError>;

    /// Rows for one entity, in surrogate-key order.
    async fn list_entity(
        &self,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<StructuredEntity>, StoreError>;

    /// Rows whose `source_updated_at` falls in `[from_millis, to_millis]`,
    /// for reporting queries that are awkward against the primary store.
    async fn query_updated_range(
        &self,
        entity: &str,
        from_millis: i64,
        to_millis: i64,
    ) -> Result<Vec<StructuredEntity>, StoreError>;
}
