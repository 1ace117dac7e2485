use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{now_millis, MirrorStore, StoreError, StructuredEntity};
use crate::normalize::NormalizedRecord;

/// In-memory mirror store used by tests and demos.
///
/// Keyed by `(entity, source_id)`; surrogate ids come from a process-local
/// counter. Writes can be failed on demand to exercise the discard paths.
pub struct InMemoryMirror {
    rows: DashMap<(String, String), StructuredEntity>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl InMemoryMirror {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Make every subsequent write fail (transient-outage simulation).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        Ok(())
    }

    fn apply_upsert(&self, entity: &str, record: &NormalizedRecord) {
        let key = (entity.to_string(), record.source_id.clone());
        let now = now_millis();
        match self.rows.get_mut(&key) {
            Some(mut row) => {
                row.data = record.data.clone();
                row.source_created_at = record.source_created_at.map(|t| t.timestamp_millis());
                row.source_updated_at = record.source_updated_at.map(|t| t.timestamp_millis());
                row.updated_at = now;
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.rows.insert(
                    key,
                    StructuredEntity {
                        id,
                        entity: entity.to_string(),
                        source_id: record.source_id.clone(),
                        data: record.data.clone(),
                        source_created_at: record.source_created_at.map(|t| t.timestamp_millis()),
                        source_updated_at: record.source_updated_at.map(|t| t.timestamp_millis()),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }
}

impl Default for InMemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn get(
        &self,
        entity: &str,
        source_id: &str,
    ) -> Result<Option<StructuredEntity>, StoreError> {
        let key = (entity.to_string(), source_id.to_string());
        Ok(self.rows.get(&key).map(|r| r.value().clone()))
    }

    async fn upsert(&self, entity: &str, record: &NormalizedRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.apply_upsert(entity, record);
        Ok(())
    }

    async fn upsert_batch(
        &self,
        entity: &str,
        records: &[NormalizedRecord],
    ) -> Result<usize, StoreError> {
        self.check_writable()?;
        for record in records {
            self.apply_upsert(entity, record);
        }
        Ok(records.len())
    }

    async fn delete(&self, entity: &str, source_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let key = (entity.to_string(), source_id.to_string());
        self.rows.remove(&key);
        Ok(())
    }

    async fn count_entity(&self, entity: &str) -> Result<u64, StoreError> {
        Ok(self.rows.iter().filter(|r| r.key().0 == entity).count() as u64)
    }

    async fn list_entity(
        &self,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<StructuredEntity>, StoreError> {
        let mut rows: Vec<StructuredEntity> = self
            .rows
            .iter()
            .filter(|r| r.key().0 == entity)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn query_updated_range(
        &self,
        entity: &str,
        from_millis: i64,
        to_millis: i64,
    ) -> Result<Vec<StructuredEntity>, StoreError> {
        let mut rows: Vec<StructuredEntity> = self
            .rows
            .iter()
            .filter(|r| r.key().0 == entity)
            .filter(|r| {
                r.value()
                    .source_updated_at
                    .is_some_and(|t| t >= from_millis && t <= to_millis)
            })
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.source_updated_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::value::RawValue;
    use chrono::{TimeZone, Utc};

    fn normalized(id: &str, version: i64) -> NormalizedRecord {
        let raw = RawValue::record([
            ("_id", RawValue::String(id.into())),
            ("version", RawValue::Int(version)),
        ]);
        normalize(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let store = InMemoryMirror::new();
        store.upsert("User", &normalized("a", 1)).await.unwrap();

        let row = store.get("User", "a").await.unwrap().unwrap();
        assert_eq!(row.entity, "User");
        assert_eq!(row.source_id, "a");
        assert_eq!(row.data["version"], 1);
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row_last_data_wins() {
        let store = InMemoryMirror::new();
        store.upsert("User", &normalized("a", 1)).await.unwrap();
        let first = store.get("User", "a").await.unwrap().unwrap();

        store.upsert("User", &normalized("a", 2)).await.unwrap();
        let second = store.get("User", "a").await.unwrap().unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(second.data["version"], 2);
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_noop() {
        let store = InMemoryMirror::new();
        store.upsert("User", &normalized("a", 1)).await.unwrap();

        store.delete("User", "never-mirrored").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_same_source_id_across_entities_is_distinct() {
        let store = InMemoryMirror::new();
        store.upsert("User", &normalized("a", 1)).await.unwrap();
        store.upsert("Organization", &normalized("a", 9)).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.count_entity("User").await.unwrap(), 1);
        assert_eq!(store.count_entity("Organization").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_updated_range() {
        let store = InMemoryMirror::new();
        for (id, hour) in [("a", 8), ("b", 10), ("c", 12)] {
            let raw = RawValue::record([
                ("_id", RawValue::String(id.into())),
                (
                    "updatedAt",
                    RawValue::Date(Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()),
                ),
            ]);
            store.upsert("User", &normalize(&raw).unwrap()).await.unwrap();
        }

        let from = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap().timestamp_millis();
        let to = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap().timestamp_millis();
        let rows = store.query_updated_range("User", from, to).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_id, "b");
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = InMemoryMirror::new();
        store.set_fail_writes(true);
        assert!(store.upsert("User", &normalized("a", 1)).await.is_err());

        store.set_fail_writes(false);
        assert!(store.upsert("User", &normalized("a", 1)).await.is_ok());
    }
}
