//! # Mirror Engine
//!
//! A write-behind structured mirror: keeps a relational, query-friendly
//! secondary store consistent with a schema-flexible document-style primary
//! store, and can rebuild the mirror from a full scan.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Primary Store                           │
//! │  • Owned by the host application                            │
//! │  • Read via SourceAccessor (paginated, restartable)         │
//! │  • Emits created/updated/deleted lifecycle events           │
//! └─────────────────────────────────────────────────────────────┘
//!          │ lifecycle events              │ paginated scan
//!          ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  Write-Behind Replicator │   │   Batch Reconciliation Job   │
//! │  • Unbounded task queue  │   │  • Page → normalize → bulk   │
//! │  • Background worker     │   │    upsert, per entity        │
//! │  • Failures logged and   │   │  • Repairs missed events and │
//! │    dropped               │   │    dropped writes            │
//! └──────────────────────────┘   └──────────────────────────────┘
//!          │ normalize + upsert/delete     │ bulk upsert
//!          ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Mirror Store                            │
//! │  • structured_entities, unique (entity, source_id)          │
//! │  • SQLite/MySQL via sqlx Any, JSON data as TEXT             │
//! │  • Current state only, no history                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_engine::{
//!     EntityRegistry, InMemorySource, MirrorConfig, MirrorEngine, RawValue,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let users = Arc::new(InMemorySource::new());
//!     let mut registry = EntityRegistry::new();
//!     registry.register("User", users.clone()).expect("duplicate entity");
//!
//!     let config = MirrorConfig {
//!         sql_url: Some("sqlite:mirror.db?mode=rwc".into()),
//!         ..Default::default()
//!     };
//!     let engine = MirrorEngine::start(config, registry)
//!         .await
//!         .expect("Failed to start");
//!
//!     // Live path: a primary-store write shows up in the mirror shortly after
//!     users.insert(RawValue::record([
//!         ("_id", RawValue::String("u1".into())),
//!         ("name", RawValue::String("Alice".into())),
//!     ]));
//!
//!     // Batch path: rebuild or repair the whole mirror
//!     for report in engine.reconcile().await {
//!         println!("{}: {} mirrored", report.entity, report.processed);
//!     }
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Guarantees (and non-guarantees)
//!
//! - The primary write path is never blocked or failed by the mirror.
//! - Consistency is eventual: the replication queue is not durable and failed
//!   mirror writes are logged and dropped; reconciliation is the repair path.
//! - Writes to the same `(entity, source_id)` have no cross-writer ordering
//!   guarantee; the last write to land on the mirror wins.
//!
//! ## Modules
//!
//! - [`engine`]: the [`MirrorEngine`] façade
//! - [`value`] / [`normalize`]: raw value model and flattening
//! - [`registry`]: entity registry
//! - [`source`]: primary-store access seam
//! - [`replicator`]: write-behind replication
//! - [`reconcile`]: batch reconciliation job
//! - [`mirror`]: mirror store backends (SQL, Memory)
//! - [`resilience`]: retry policies for the SQL client

pub mod config;
pub mod engine;
pub mod metrics;
pub mod mirror;
pub mod normalize;
pub mod reconcile;
pub mod registry;
pub mod replicator;
pub mod resilience;
pub mod source;
pub mod value;

pub use config::MirrorConfig;
pub use engine::MirrorEngine;
pub use mirror::{InMemoryMirror, MirrorStore, SqlMirrorStore, StoreError, StructuredEntity};
pub use normalize::{normalize, NormalizedRecord};
pub use reconcile::{reconcile, ReconcileReport};
pub use registry::{EntityRegistry, RegistryError};
pub use replicator::WriteBehindReplicator;
pub use resilience::retry::RetryConfig;
pub use source::{InMemorySource, LifecycleEvent, SourceAccessor, SourceError};
pub use value::{RawValue, RefId};
