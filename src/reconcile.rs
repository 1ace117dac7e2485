// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch reconciliation job.
//!
//! Produces (or repairs) a complete mirror snapshot for every registered
//! entity: paginate the primary collection, normalize each page, bulk-upsert
//! it. Used for first-time bootstrap and to close the gaps the write-behind
//! path is allowed to leave (missed events, dropped writes, lost queue on
//! restart).
//!
//! Reconciliation only upserts; it never deletes. Rows whose source record
//! disappeared between runs are removed only by live delete notifications.
//!
//! Safe to run while the replicator is live: both paths converge on the same
//! upsert semantics, and the last write observed by the mirror store wins.

use std::sync::Arc;

use tracing::{info, warn};

use crate::metrics;
use crate::mirror::MirrorStore;
use crate::normalize::{normalize, NormalizedRecord};
use crate::registry::{EntityRegistry, RegisteredEntity};

/// Per-entity outcome, in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub entity: String,
    /// Records actually mirrored (records with no source id are skipped and
    /// not counted).
    pub processed: u64,
    /// Set when a page read or upsert aborted this entity's pass.
    pub error: Option<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Reconcile every registered entity, sequentially, in registry order.
///
/// A failure aborts the affected entity only; the remaining entities still
/// run. The returned reports carry per-entity counts and errors; the job
/// itself never fails as a whole.
pub async fn reconcile(
    registry: &EntityRegistry,
    store: &Arc<dyn MirrorStore>,
    page_size: usize,
) -> Vec<ReconcileReport> {
    let run_id = uuid::Uuid::new_v4();
    info!(%run_id, entities = registry.len(), page_size, "Reconciliation started");

    let mut reports = Vec::with_capacity(registry.len());
    for entry in registry.iter() {
        let report = reconcile_entity(entry, store, page_size).await;
        match &report.error {
            None => info!(
                %run_id,
                entity = %report.entity,
                processed = report.processed,
                "Entity reconciled"
            ),
            Some(err) => warn!(
                %run_id,
                entity = %report.entity,
                processed = report.processed,
                error = %err,
                "Entity reconciliation aborted"
            ),
        }
        metrics::record_reconcile_outcome(&report.entity, report.is_success());
        reports.push(report);
    }

    info!(%run_id, "Reconciliation finished");
    reports
}

async fn reconcile_entity(
    entry: &RegisteredEntity,
    store: &Arc<dyn MirrorStore>,
    page_size: usize,
) -> ReconcileReport {
    let entity = entry.name().to_string();
    let mut processed = 0u64;
    let mut page_index = 0usize;

    loop {
        metrics::record_reconcile_page(&entity);
        let page = match entry.accessor().paginate(page_size, page_index).await {
            Ok(page) => page,
            Err(err) => {
                return ReconcileReport {
                    entity,
                    processed,
                    error: Some(err.to_string()),
                }
            }
        };
        if page.is_empty() {
            break;
        }

        // Unmirrorable records are skipped here with the same rule the live
        // path applies.
        let batch: Vec<NormalizedRecord> = page.iter().filter_map(normalize).collect();

        if !batch.is_empty() {
            if let Err(err) = store.upsert_batch(&entity, &batch).await {
                return ReconcileReport {
                    entity,
                    processed,
                    error: Some(err.to_string()),
                };
            }
            metrics::record_reconcile_processed(&entity, batch.len());
            processed += batch.len() as u64;
        }

        page_index += 1;
    }

    ReconcileReport {
        entity,
        processed,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::InMemoryMirror;
    use crate::source::InMemorySource;
    use crate::value::RawValue;

    fn record(id: &str) -> RawValue {
        RawValue::record([
            ("_id", RawValue::String(id.into())),
            ("payload", RawValue::String(format!("data-{}", id))),
        ])
    }

    fn seeded_source(count: usize, prefix: &str) -> Arc<InMemorySource> {
        Arc::new(InMemorySource::with_records(
            (0..count).map(|i| record(&format!("{}{}", prefix, i))).collect(),
        ))
    }

    fn mirror() -> Arc<dyn MirrorStore> {
        Arc::new(InMemoryMirror::new())
    }

    #[tokio::test]
    async fn test_single_entity_full_scan() {
        let mut registry = EntityRegistry::new();
        registry.register("User", seeded_source(1200, "u")).unwrap();
        let store = mirror();

        let reports = reconcile(&registry, &store, 500).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].entity, "User");
        assert_eq!(reports[0].processed, 1200);
        assert!(reports[0].is_success());
        assert_eq!(store.count_entity("User").await.unwrap(), 1200);
    }

    #[tokio::test]
    async fn test_records_without_id_are_skipped_not_counted() {
        let source = Arc::new(InMemorySource::with_records(vec![
            record("a"),
            RawValue::record([("name", RawValue::String("no id".into()))]),
            record("b"),
        ]));
        let mut registry = EntityRegistry::new();
        registry.register("User", source).unwrap();
        let store = mirror();

        let reports = reconcile(&registry, &store, 10).await;

        assert_eq!(reports[0].processed, 2);
        assert!(reports[0].is_success());
        assert_eq!(store.count_entity("User").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_entity_does_not_stop_others() {
        let failing = seeded_source(100, "b");
        failing.fail_on_page(1);

        let mut registry = EntityRegistry::new();
        registry.register("A", seeded_source(30, "a")).unwrap();
        registry.register("B", failing).unwrap();
        registry.register("C", seeded_source(7, "c")).unwrap();
        let store = mirror();

        let reports = reconcile(&registry, &store, 20).await;

        assert_eq!(reports.len(), 3);

        assert_eq!(reports[0].entity, "A");
        assert_eq!(reports[0].processed, 30);
        assert!(reports[0].is_success());

        // B got its first page in, then aborted
        assert_eq!(reports[1].entity, "B");
        assert_eq!(reports[1].processed, 20);
        assert!(reports[1].error.as_deref().unwrap().contains("page 1"));

        assert_eq!(reports[2].entity, "C");
        assert_eq!(reports[2].processed, 7);
        assert!(reports[2].is_success());

        assert_eq!(store.count_entity("A").await.unwrap(), 30);
        assert_eq!(store.count_entity("C").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_upsert_failure_aborts_entity() {
        let mut registry = EntityRegistry::new();
        registry.register("User", seeded_source(10, "u")).unwrap();

        let store = Arc::new(InMemoryMirror::new());
        store.set_fail_writes(true);
        let store_dyn: Arc<dyn MirrorStore> = store.clone();

        let reports = reconcile(&registry, &store_dyn, 4).await;

        assert_eq!(reports[0].processed, 0);
        assert!(!reports[0].is_success());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let mut registry = EntityRegistry::new();
        registry.register("User", seeded_source(25, "u")).unwrap();
        let store = mirror();

        let first = reconcile(&registry, &store, 10).await;
        let second = reconcile(&registry, &store, 10).await;

        assert_eq!(first[0].processed, 25);
        assert_eq!(second[0].processed, 25);
        assert_eq!(store.count_entity("User").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_empty_source_reports_zero() {
        let mut registry = EntityRegistry::new();
        registry.register("User", Arc::new(InMemorySource::new())).unwrap();
        let store = mirror();

        let reports = reconcile(&registry, &store, 500).await;

        assert_eq!(reports[0].processed, 0);
        assert!(reports[0].is_success());
    }

    #[tokio::test]
    async fn test_reports_follow_registry_order() {
        let mut registry = EntityRegistry::new();
        for name in ["Zeta", "Alpha", "Mid"] {
            registry.register(name, seeded_source(1, name)).unwrap();
        }
        let store = mirror();

        let reports = reconcile(&registry, &store, 500).await;
        let names: Vec<_> = reports.iter().map(|r| r.entity.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    }
}
