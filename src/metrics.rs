// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the mirror engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host process
//! chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mirror_engine_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `entity`: logical entity name (User, Organization, ...)
//! - `operation`: upsert, delete
//! - `status`: success, error

use metrics::{counter, gauge};

/// Record a live mirror write attempt.
pub fn record_mirror_write(entity: &str, operation: &str, status: &str) {
    counter!(
        "mirror_engine_writes_total",
        "entity" => entity.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a record skipped because it has no source id.
pub fn record_unmirrorable(entity: &str) {
    counter!(
        "mirror_engine_unmirrorable_total",
        "entity" => entity.to_string()
    )
    .increment(1);
}

/// Record lifecycle events lost to a lagged subscriber.
pub fn record_lagged_events(entity: &str, missed: u64) {
    counter!(
        "mirror_engine_lagged_events_total",
        "entity" => entity.to_string()
    )
    .increment(missed);
}

/// Set the replication queue depth (tasks waiting for the worker).
pub fn set_queue_depth(depth: usize) {
    gauge!("mirror_engine_queue_depth").set(depth as f64);
}

/// Record one reconciliation page read.
pub fn record_reconcile_page(entity: &str) {
    counter!(
        "mirror_engine_reconcile_pages_total",
        "entity" => entity.to_string()
    )
    .increment(1);
}

/// Record reconciled (mirrored) records.
pub fn record_reconcile_processed(entity: &str, count: usize) {
    counter!(
        "mirror_engine_reconcile_processed_total",
        "entity" => entity.to_string()
    )
    .increment(count as u64);
}

/// Record the outcome of one entity's reconciliation pass.
pub fn record_reconcile_outcome(entity: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "mirror_engine_reconcile_runs_total",
        "entity" => entity.to_string(),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API compiles and doesn't panic; with no recorder
    // installed the calls are no-ops.

    #[test]
    fn test_write_counters() {
        record_mirror_write("User", "upsert", "success");
        record_mirror_write("User", "delete", "error");
        record_unmirrorable("User");
        record_lagged_events("User", 12);
    }

    #[test]
    fn test_queue_gauge() {
        set_queue_depth(0);
        set_queue_depth(42);
    }

    #[test]
    fn test_reconcile_counters() {
        record_reconcile_page("Organization");
        record_reconcile_processed("Organization", 500);
        record_reconcile_outcome("Organization", true);
        record_reconcile_outcome("User", false);
    }
}
