// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL mirror store.
//!
//! Backs the structured mirror with SQLite or MySQL via sqlx's `Any` driver.
//! The normalized record lands in a TEXT `data` column; MySQL can still query
//! it with `JSON_EXTRACT()`:
//!
//! ```sql
//! -- All users in a department, without touching the primary store
//! SELECT * FROM structured_entities
//! WHERE entity = 'User' AND JSON_EXTRACT(data, '$.department') = 'Payroll';
//! ```
//!
//! Schema:
//! ```sql
//! CREATE TABLE structured_entities (
//!   id BIGINT AUTO_INCREMENT PRIMARY KEY,  -- surrogate, store-owned
//!   entity VARCHAR(128) NOT NULL,
//!   source_id VARCHAR(255) NOT NULL,
//!   data LONGTEXT NOT NULL,                -- normalized JSON as text
//!   source_created_at BIGINT,              -- nullable, epoch millis
//!   source_updated_at BIGINT,
//!   created_at BIGINT NOT NULL,            -- mirror-owned audit
//!   updated_at BIGINT NOT NULL,
//!   UNIQUE (entity, source_id)
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! TEXT is used instead of a native JSON type because the `Any` driver has no
//! MySQL JSON mapping, and MySQL TEXT columns come back as bytes. Reads try
//! `String` first (SQLite) and fall back to `Vec<u8>` (MySQL).

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;

use super::traits::{now_millis, MirrorStore, StoreError, StructuredEntity};
use crate::normalize::NormalizedRecord;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Multi-row upserts are chunked to stay under MySQL's max_allowed_packet.
const UPSERT_CHUNK_SIZE: usize = 500;

pub struct SqlMirrorStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlMirrorStore {
    /// Connect with startup-mode retry (fails fast if the config is wrong)
    /// and create the schema if missing.
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("mirror_sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// WAL mode gives SQLite concurrent reads during writes, which matters
    /// when reconciliation and reporting queries overlap.
    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let table_sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS structured_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                source_id TEXT NOT NULL,
                data TEXT NOT NULL,
                source_created_at INTEGER,
                source_updated_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (entity, source_id)
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS structured_entities (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                entity VARCHAR(128) NOT NULL,
                source_id VARCHAR(255) NOT NULL,
                data LONGTEXT NOT NULL,
                source_created_at BIGINT,
                source_updated_at BIGINT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE KEY uq_entity_source (entity, source_id),
                INDEX idx_entity_updated (entity, source_updated_at)
            )
            "#
        };

        retry("mirror_sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(table_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        if self.is_sqlite {
            // SQLite has no inline INDEX clause
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_entity_updated \
                 ON structured_entities (entity, source_updated_at)",
            )
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        Ok(())
    }

    fn upsert_sql(&self, rows: usize) -> String {
        let placeholders: Vec<&str> = (0..rows).map(|_| "(?, ?, ?, ?, ?, ?, ?)").collect();
        if self.is_sqlite {
            format!(
                "INSERT INTO structured_entities \
                 (entity, source_id, data, source_created_at, source_updated_at, created_at, updated_at) \
                 VALUES {} \
                 ON CONFLICT(entity, source_id) DO UPDATE SET \
                    data = excluded.data, \
                    source_created_at = excluded.source_created_at, \
                    source_updated_at = excluded.source_updated_at, \
                    updated_at = excluded.updated_at",
                placeholders.join(", ")
            )
        } else {
            format!(
                "INSERT INTO structured_entities \
                 (entity, source_id, data, source_created_at, source_updated_at, created_at, updated_at) \
                 VALUES {} \
                 ON DUPLICATE KEY UPDATE \
                    data = VALUES(data), \
                    source_created_at = VALUES(source_created_at), \
                    source_updated_at = VALUES(source_updated_at), \
                    updated_at = VALUES(updated_at)",
                placeholders.join(", ")
            )
        }
    }

    async fn upsert_chunk(
        &self,
        entity: &str,
        chunk: &[NormalizedRecord],
    ) -> Result<usize, StoreError> {
        #[derive(Clone)]
        struct PreparedRow {
            source_id: String,
            data: String,
            source_created_at: Option<i64>,
            source_updated_at: Option<i64>,
            now: i64,
        }

        let now = now_millis();
        let mut prepared = Vec::with_capacity(chunk.len());
        for record in chunk {
            let data = serde_json::to_string(&record.data)
                .map_err(|e| StoreError::Backend(format!("JSON encode failed: {}", e)))?;
            prepared.push(PreparedRow {
                source_id: record.source_id.clone(),
                data,
                source_created_at: record.source_created_at.map(|t| t.timestamp_millis()),
                source_updated_at: record.source_updated_at.map(|t| t.timestamp_millis()),
                now,
            });
        }

        let sql = self.upsert_sql(prepared.len());
        let entity = entity.to_string();

        retry("mirror_sql_upsert", &RetryConfig::query(), || {
            let sql = sql.clone();
            let entity = entity.clone();
            let prepared = prepared.clone();
            async move {
                let mut query = sqlx::query(&sql);
                for row in &prepared {
                    query = query
                        .bind(&entity)
                        .bind(&row.source_id)
                        .bind(&row.data)
                        .bind(row.source_created_at)
                        .bind(row.source_updated_at)
                        .bind(row.now)
                        .bind(row.now);
                }
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(())
            }
        })
        .await?;

        Ok(chunk.len())
    }

    fn row_to_entity(row: &sqlx::any::AnyRow) -> Result<StructuredEntity, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let entity = read_text(row, "entity")?
            .ok_or_else(|| StoreError::Backend("NULL entity column".into()))?;
        let source_id = read_text(row, "source_id")?
            .ok_or_else(|| StoreError::Backend("NULL source_id column".into()))?;
        let data_text = read_text(row, "data")?
            .ok_or_else(|| StoreError::Backend("NULL data column".into()))?;
        let data = serde_json::from_str(&data_text)
            .map_err(|e| StoreError::Backend(format!("Corrupt data column: {}", e)))?;

        Ok(StructuredEntity {
            id,
            entity,
            source_id,
            data,
            source_created_at: row.try_get("source_created_at").ok(),
            source_updated_at: row.try_get("source_updated_at").ok(),
            created_at: row.try_get("created_at").unwrap_or(0),
            updated_at: row.try_get("updated_at").unwrap_or(0),
        })
    }
}

/// Read a TEXT column as String (SQLite) with a bytes fallback (MySQL
/// LONGTEXT under the Any driver comes back as BLOB).
fn read_text(row: &sqlx::any::AnyRow, column: &str) -> Result<Option<String>, StoreError> {
    if let Ok(s) = row.try_get::<String, _>(column) {
        return Ok(Some(s));
    }
    match row.try_get::<Vec<u8>, _>(column) {
        Ok(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StoreError::Backend(format!("Non-UTF8 {} column: {}", column, e))),
        Err(_) => Ok(None),
    }
}

const SELECT_COLUMNS: &str = "id, entity, source_id, data, source_created_at, source_updated_at, created_at, updated_at";

#[async_trait]
impl MirrorStore for SqlMirrorStore {
    async fn get(
        &self,
        entity: &str,
        source_id: &str,
    ) -> Result<Option<StructuredEntity>, StoreError> {
        let entity = entity.to_string();
        let source_id = source_id.to_string();

        retry("mirror_sql_get", &RetryConfig::query(), || async {
            let sql = format!(
                "SELECT {} FROM structured_entities WHERE entity = ? AND source_id = ?",
                SELECT_COLUMNS
            );
            let result = sqlx::query(&sql)
                .bind(&entity)
                .bind(&source_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            match result {
                Some(row) => Ok(Some(Self::row_to_entity(&row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn upsert(&self, entity: &str, record: &NormalizedRecord) -> Result<(), StoreError> {
        self.upsert_chunk(entity, std::slice::from_ref(record)).await?;
        Ok(())
    }

    async fn upsert_batch(
        &self,
        entity: &str,
        records: &[NormalizedRecord],
    ) -> Result<usize, StoreError> {
        let mut written = 0usize;
        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            written += self.upsert_chunk(entity, chunk).await?;
        }
        Ok(written)
    }

    async fn delete(&self, entity: &str, source_id: &str) -> Result<(), StoreError> {
        let entity = entity.to_string();
        let source_id = source_id.to_string();

        retry("mirror_sql_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM structured_entities WHERE entity = ? AND source_id = ?")
                .bind(&entity)
                .bind(&source_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn count_entity(&self, entity: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("SELECT COUNT(*) as cnt FROM structured_entities WHERE entity = ?")
            .bind(entity)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let count: i64 = result
            .try_get("cnt")
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(count as u64)
    }

    async fn list_entity(
        &self,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<StructuredEntity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM structured_entities WHERE entity = ? ORDER BY id LIMIT ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(entity)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter().map(Self::row_to_entity).collect()
    }

    async fn query_updated_range(
        &self,
        entity: &str,
        from_millis: i64,
        to_millis: i64,
    ) -> Result<Vec<StructuredEntity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM structured_entities \
             WHERE entity = ? AND source_updated_at >= ? AND source_updated_at <= ? \
             ORDER BY source_updated_at",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(entity)
            .bind(from_millis)
            .bind(to_millis)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter().map(Self::row_to_entity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::value::{RawValue, RefId};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = PathBuf::from("temp");
        let _ = std::fs::create_dir_all(&dir);
        dir.join(format!("mirror_sql_test_{}.db", name))
    }

    /// Clean up SQLite database and its WAL files
    fn cleanup_db(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(format!("{}-wal", path.display()));
        let _ = std::fs::remove_file(format!("{}-shm", path.display()));
    }

    async fn open_store(name: &str) -> (SqlMirrorStore, PathBuf) {
        let path = temp_db_path(name);
        cleanup_db(&path);
        let url = format!("sqlite://{}?mode=rwc", path.display());
        (SqlMirrorStore::new(&url).await.unwrap(), path)
    }

    fn record(id: &str, version: i64) -> NormalizedRecord {
        let raw = RawValue::record([
            ("_id", RawValue::String(id.into())),
            ("version", RawValue::Int(version)),
            (
                "updatedAt",
                RawValue::Date(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, version as u32).unwrap()),
            ),
        ]);
        normalize(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get_round_trip() {
        let (store, path) = open_store("round_trip").await;

        store.upsert("User", &record("a", 1)).await.unwrap();

        let row = store.get("User", "a").await.unwrap().unwrap();
        assert_eq!(row.entity, "User");
        assert_eq!(row.source_id, "a");
        assert_eq!(row.data["version"], 1);
        assert!(row.source_updated_at.is_some());
        assert!(row.created_at > 0);

        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_key() {
        let (store, path) = open_store("idempotent").await;

        store.upsert("User", &record("a", 1)).await.unwrap();
        let first = store.get("User", "a").await.unwrap().unwrap();

        store.upsert("User", &record("a", 2)).await.unwrap();
        let second = store.get("User", "a").await.unwrap().unwrap();

        assert_eq!(store.count_entity("User").await.unwrap(), 1);
        assert_eq!(second.data["version"], 2);
        assert_eq!(second.id, first.id, "surrogate key must be stable");
        assert_eq!(second.created_at, first.created_at);

        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_delete_then_delete_again() {
        let (store, path) = open_store("delete").await;

        store.upsert("User", &record("a", 1)).await.unwrap();
        store.delete("User", "a").await.unwrap();
        assert!(store.get("User", "a").await.unwrap().is_none());

        // Absent row: no-op, not an error
        store.delete("User", "a").await.unwrap();

        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_batch_upsert_mixed_insert_and_overwrite() {
        let (store, path) = open_store("batch").await;

        store.upsert("User", &record("a", 1)).await.unwrap();

        let batch = vec![record("a", 5), record("b", 1), record("c", 1)];
        let written = store.upsert_batch("User", &batch).await.unwrap();

        assert_eq!(written, 3);
        assert_eq!(store.count_entity("User").await.unwrap(), 3);
        let a = store.get("User", "a").await.unwrap().unwrap();
        assert_eq!(a.data["version"], 5);

        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_entities_are_isolated() {
        let (store, path) = open_store("isolated").await;

        store.upsert("User", &record("a", 1)).await.unwrap();
        store.upsert("Organization", &record("a", 1)).await.unwrap();

        assert_eq!(store.count_entity("User").await.unwrap(), 1);
        assert_eq!(store.count_entity("Organization").await.unwrap(), 1);

        store.delete("User", "a").await.unwrap();
        assert!(store.get("Organization", "a").await.unwrap().is_some());

        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_query_updated_range() {
        let (store, path) = open_store("range").await;

        for v in 1..=5 {
            store.upsert("User", &record(&format!("u{}", v), v)).await.unwrap();
        }
        // Row without an updatedAt never matches a range query
        let bare = normalize(&RawValue::record([(
            "_id",
            RawValue::Reference(RefId([9; 12])),
        )]))
        .unwrap();
        store.upsert("User", &bare).await.unwrap();

        let from = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 2).unwrap().timestamp_millis();
        let to = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 4).unwrap().timestamp_millis();
        let rows = store.query_updated_range("User", from, to).await.unwrap();

        let ids: Vec<_> = rows.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["u2", "u3", "u4"]);

        cleanup_db(&path);
    }

    #[tokio::test]
    async fn test_list_entity_in_surrogate_order() {
        let (store, path) = open_store("list").await;

        for id in ["c", "a", "b"] {
            store.upsert("User", &record(id, 1)).await.unwrap();
        }

        let rows = store.list_entity("User", 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"], "insertion order via surrogate key");

        cleanup_db(&path);
    }
}
