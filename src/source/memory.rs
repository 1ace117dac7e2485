// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory primary-store accessor.
//!
//! Reference implementation of [`SourceAccessor`] used by tests and demos.
//! Holds a flat vector of raw records and emits lifecycle events on mutation,
//! the same contract a real document-store adapter would provide.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::traits::{LifecycleEvent, SourceAccessor, SourceError};
use crate::normalize::{normalize, ID_FIELD};
use crate::value::RawValue;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct InMemorySource {
    records: RwLock<Vec<RawValue>>,
    events: broadcast::Sender<LifecycleEvent>,
    /// When set, paginate fails on this page index (for failure tests).
    fail_on_page: RwLock<Option<usize>>,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            events,
            fail_on_page: RwLock::new(None),
        }
    }

    /// Seed records without emitting events (pre-existing data).
    #[must_use]
    pub fn with_records(records: Vec<RawValue>) -> Self {
        let source = Self::new();
        *source.records.write() = records;
        source
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Make `paginate` fail when asked for the given page index.
    pub fn fail_on_page(&self, page_index: usize) {
        *self.fail_on_page.write() = Some(page_index);
    }

    /// Insert a record and emit `Created`.
    pub fn insert(&self, record: RawValue) {
        self.records.write().push(record.clone());
        let _ = self.events.send(LifecycleEvent::Created(record));
    }

    /// Replace the record with the same `_id` (or append) and emit `Updated`.
    pub fn update(&self, record: RawValue) {
        let id = source_id_of(&record);
        {
            let mut records = self.records.write();
            match records.iter_mut().find(|r| source_id_of(r) == id) {
                Some(slot) => *slot = record.clone(),
                None => records.push(record.clone()),
            }
        }
        let _ = self.events.send(LifecycleEvent::Updated(record));
    }

    /// Remove by stringified source id and emit `Deleted`.
    pub fn delete(&self, source_id: &str) {
        self.records
            .write()
            .retain(|r| source_id_of(r).as_deref() != Some(source_id));
        let _ = self.events.send(LifecycleEvent::Deleted(source_id.to_string()));
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

fn source_id_of(record: &RawValue) -> Option<String> {
    match record.as_record()?.get(ID_FIELD) {
        Some(RawValue::Reference(id)) => Some(id.to_hex()),
        Some(RawValue::String(s)) => Some(s.clone()),
        _ => normalize(record).map(|n| n.source_id),
    }
}

#[async_trait]
impl SourceAccessor for InMemorySource {
    async fn paginate(
        &self,
        page_size: usize,
        page_index: usize,
    ) -> Result<Vec<RawValue>, SourceError> {
        if *self.fail_on_page.read() == Some(page_index) {
            return Err(SourceError::Read(format!(
                "injected failure on page {}",
                page_index
            )));
        }

        let records = self.records.read();
        let start = page_index.saturating_mul(page_size);
        if start >= records.len() {
            return Ok(Vec::new());
        }
        let end = (start + page_size).min(records.len());
        Ok(records[start..end].to_vec())
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
