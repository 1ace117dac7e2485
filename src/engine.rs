// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror engine façade.
//!
//! Ties the registry, the mirror store and the write-behind replicator
//! together behind one handle the host application owns.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_engine::{EntityRegistry, InMemorySource, MirrorConfig, MirrorEngine};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut registry = EntityRegistry::new();
//! registry.register("User", Arc::new(InMemorySource::new())).unwrap();
//!
//! let engine = MirrorEngine::start(MirrorConfig::default(), registry)
//!     .await
//!     .expect("Failed to start");
//!
//! let reports = engine.reconcile().await;
//! for report in &reports {
//!     println!("{}: {} mirrored", report.entity, report.processed);
//! }
//!
//! engine.shutdown().await;
//! # }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::MirrorConfig;
use crate::mirror::{InMemoryMirror, MirrorStore, SqlMirrorStore, StoreError};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::registry::EntityRegistry;
use crate::replicator::WriteBehindReplicator;

pub struct MirrorEngine {
    config: MirrorConfig,
    registry: EntityRegistry,
    store: Arc<dyn MirrorStore>,
    replicator: WriteBehindReplicator,
}

impl MirrorEngine {
    /// Connect the mirror store, spawn the replication worker and subscribe
    /// it to every registered entity's lifecycle stream.
    pub async fn start(
        config: MirrorConfig,
        registry: EntityRegistry,
    ) -> Result<Self, StoreError> {
        let store: Arc<dyn MirrorStore> = match &config.sql_url {
            Some(url) => {
                info!(url = %url, "Connecting SQL mirror store");
                Arc::new(SqlMirrorStore::new(url).await?)
            }
            None => {
                info!("No sql_url configured; using in-memory mirror store");
                Arc::new(InMemoryMirror::new())
            }
        };

        Self::start_with_store(config, registry, store).await
    }

    /// Start against an externally constructed mirror store.
    pub async fn start_with_store(
        config: MirrorConfig,
        registry: EntityRegistry,
        store: Arc<dyn MirrorStore>,
    ) -> Result<Self, StoreError> {
        let replicator = WriteBehindReplicator::spawn(store.clone());
        replicator.attach(&registry).await;

        info!(entities = registry.len(), "Mirror engine started");
        Ok(Self {
            config,
            registry,
            store,
            replicator,
        })
    }

    /// The mirror store, for reporting queries.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn replicator(&self) -> &WriteBehindReplicator {
        &self.replicator
    }

    /// Run the batch reconciliation job over every registered entity.
    pub async fn reconcile(&self) -> Vec<ReconcileReport> {
        reconcile(&self.registry, &self.store, self.config.reconcile_page_size).await
    }

    /// Wait for every already-enqueued live-replication task to apply.
    pub async fn flush(&self) {
        self.replicator.flush().await;
    }

    /// Drain the queue and stop the background worker.
    pub async fn shutdown(&self) {
        self.replicator.shutdown().await;
        info!("Mirror engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use crate::value::RawValue;

    fn record(id: &str) -> RawValue {
        RawValue::record([("_id", RawValue::String(id.into()))])
    }

    #[tokio::test]
    async fn test_start_without_sql_uses_memory_store() {
        let mut registry = EntityRegistry::new();
        let source = Arc::new(InMemorySource::new());
        registry.register("User", source.clone()).unwrap();

        let engine = MirrorEngine::start(MirrorConfig::default(), registry)
            .await
            .unwrap();

        source.insert(record("a"));
        for _ in 0..100 {
            engine.flush().await;
            if engine.store().count_entity("User").await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(engine.store().count_entity("User").await.unwrap(), 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_uses_configured_page_size() {
        let mut registry = EntityRegistry::new();
        let source = Arc::new(InMemorySource::with_records(
            (0..7).map(|i| record(&format!("r{}", i))).collect(),
        ));
        registry.register("User", source).unwrap();

        let config = MirrorConfig {
            reconcile_page_size: 3,
            ..Default::default()
        };
        let engine = MirrorEngine::start(config, registry).await.unwrap();

        let reports = engine.reconcile().await;
        assert_eq!(reports[0].processed, 7);
        assert_eq!(engine.store().count_entity("User").await.unwrap(), 7);

        engine.shutdown().await;
    }
}
