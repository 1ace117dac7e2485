// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-behind replicator.
//!
//! Makes every successful primary-store mutation eventually visible in the
//! mirror without adding latency or failure modes to the primary write path.
//! [`on_upsert`](WriteBehindReplicator::on_upsert) and
//! [`on_delete`](WriteBehindReplicator::on_delete) enqueue onto an unbounded
//! in-process queue and return immediately; a single background worker
//! normalizes and writes.
//!
//! The queue is not durable. A process restart loses in-flight tasks, and a
//! failed mirror write is logged and discarded rather than retried. Both gaps
//! are repaired by the batch reconciliation job.
//!
//! Ordering: the worker is FIFO within this process, but two rapid mutations
//! of the same key can still reach the mirror out of primary-write order
//! (events from concurrent writers interleave upstream). Last
//! mirror-write-to-land wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::mirror::MirrorStore;
use crate::normalize::normalize;
use crate::registry::EntityRegistry;
use crate::source::LifecycleEvent;
use crate::value::RawValue;

enum MirrorTask {
    Upsert { entity: String, record: RawValue },
    Delete { entity: String, source_id: String },
    /// Resolves once every task enqueued before it has been applied.
    Flush(oneshot::Sender<()>),
}

pub struct WriteBehindReplicator {
    tx: mpsc::UnboundedSender<MirrorTask>,
    queue_depth: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl WriteBehindReplicator {
    /// Spawn the background worker against the given mirror store.
    #[must_use]
    pub fn spawn(store: Arc<dyn MirrorStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue_depth = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(worker_loop(rx, store, queue_depth.clone()));

        Self {
            tx,
            queue_depth,
            worker: Mutex::new(Some(worker)),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Schedule a deferred normalize-and-upsert for `(entity, record)`.
    /// Returns immediately; the primary write is never blocked or failed.
    pub fn on_upsert(&self, entity: &str, record: RawValue) {
        self.enqueue(MirrorTask::Upsert {
            entity: entity.to_string(),
            record,
        });
    }

    /// Schedule a deferred delete for `(entity, source_id)`.
    pub fn on_delete(&self, entity: &str, source_id: impl Into<String>) {
        self.enqueue(MirrorTask::Delete {
            entity: entity.to_string(),
            source_id: source_id.into(),
        });
    }

    fn enqueue(&self, task: MirrorTask) {
        // Send only fails after shutdown; late tasks are dropped by design.
        if self.tx.send(task).is_ok() {
            let depth = self.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::set_queue_depth(depth);
        }
    }

    /// Subscribe to every registered entity's lifecycle stream and feed the
    /// task queue. Created and Updated both become upserts.
    pub async fn attach(&self, registry: &EntityRegistry) {
        let mut forwarders = self.forwarders.lock().await;
        for entry in registry.iter() {
            let entity = entry.name().to_string();
            let rx = entry.accessor().subscribe();
            let tx = self.tx.clone();
            let queue_depth = self.queue_depth.clone();
            forwarders.push(tokio::spawn(forward_events(entity, rx, tx, queue_depth)));
        }
        info!(entities = registry.len(), "Write-behind replicator attached");
    }

    /// Wait until every task enqueued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(MirrorTask::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Number of tasks waiting for the worker.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Stop forwarders, drain the queue and stop the worker.
    pub async fn shutdown(&self) {
        for handle in self.forwarders.lock().await.drain(..) {
            handle.abort();
        }
        self.flush().await;
        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
            let _ = worker.await;
        }
        info!("Write-behind replicator stopped");
    }
}

async fn forward_events(
    entity: String,
    mut rx: tokio::sync::broadcast::Receiver<LifecycleEvent>,
    tx: mpsc::UnboundedSender<MirrorTask>,
    queue_depth: Arc<AtomicUsize>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let task = match event {
                    LifecycleEvent::Created(record) | LifecycleEvent::Updated(record) => {
                        MirrorTask::Upsert {
                            entity: entity.clone(),
                            record,
                        }
                    }
                    LifecycleEvent::Deleted(source_id) => MirrorTask::Delete {
                        entity: entity.clone(),
                        source_id,
                    },
                };
                if tx.send(task).is_err() {
                    break;
                }
                let depth = queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::set_queue_depth(depth);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                // Missed events surface as mirror staleness until the next
                // reconciliation run.
                warn!(entity = %entity, missed, "Lifecycle stream lagged; mirror is stale");
                metrics::record_lagged_events(&entity, missed);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                debug!(entity = %entity, "Lifecycle stream closed; forwarder exiting");
                break;
            }
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<MirrorTask>,
    store: Arc<dyn MirrorStore>,
    queue_depth: Arc<AtomicUsize>,
) {
    while let Some(task) = rx.recv().await {
        // Flush markers bypass the depth counter; they are never enqueued
        // through `enqueue`.
        if !matches!(task, MirrorTask::Flush(_)) {
            let prev = queue_depth
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
                    Some(d.saturating_sub(1))
                })
                .unwrap_or(0);
            metrics::set_queue_depth(prev.saturating_sub(1));
        }

        match task {
            MirrorTask::Upsert { entity, record } => match normalize(&record) {
                Some(normalized) => match store.upsert(&entity, &normalized).await {
                    Ok(()) => metrics::record_mirror_write(&entity, "upsert", "success"),
                    Err(err) => {
                        // Logged and discarded; reconciliation repairs the gap.
                        warn!(
                            entity = %entity,
                            source_id = %normalized.source_id,
                            error = %err,
                            "Mirror upsert failed; write dropped"
                        );
                        metrics::record_mirror_write(&entity, "upsert", "error");
                    }
                },
                None => {
                    // Unmirrorable record: valid outcome, not a failure.
                    debug!(entity = %entity, "Record has no source id; skipped");
                    metrics::record_unmirrorable(&entity);
                }
            },
            MirrorTask::Delete { entity, source_id } => {
                match store.delete(&entity, &source_id).await {
                    Ok(()) => metrics::record_mirror_write(&entity, "delete", "success"),
                    Err(err) => {
                        warn!(
                            entity = %entity,
                            source_id = %source_id,
                            error = %err,
                            "Mirror delete failed; write dropped"
                        );
                        metrics::record_mirror_write(&entity, "delete", "error");
                    }
                }
            }
            MirrorTask::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
