use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::value::RawValue;

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Primary store read failed: {0}")]
    Read(String),
}

/// Lifecycle notification from the primary store, delivered after the
/// originating write has durably succeeded. Created and Updated are treated
/// identically downstream (both become mirror upserts).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Created(RawValue),
    Updated(RawValue),
    /// Carries the stringified source id of the removed record.
    Deleted(String),
}

/// Read access to one primary-store collection.
///
/// Pagination is zero-indexed, finite and restartable: once every record has
/// been returned, the next page is empty exactly once and never loops.
#[async_trait]
pub trait SourceAccessor: Send + Sync {
    async fn paginate(
        &self,
        page_size: usize,
        page_index: usize,
    ) -> Result<Vec<RawValue>, SourceError>;

    /// Subscribe to lifecycle notifications for the same collection the
    /// accessor reads from.
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}
