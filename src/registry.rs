// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity registry.
//!
//! Fixed start-time mapping from a logical entity name ("User",
//! "Organization", ...) to the accessor for its primary-store collection.
//! Registering the same name twice is a startup-time fatal condition; the
//! registry is read-only once built.

use std::sync::Arc;

use thiserror::Error;

use crate::source::SourceAccessor;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Entity '{0}' is already registered")]
    Duplicate(String),
}

pub struct RegisteredEntity {
    name: String,
    accessor: Arc<dyn SourceAccessor>,
}

impl RegisteredEntity {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn accessor(&self) -> &Arc<dyn SourceAccessor> {
        &self.accessor
    }
}

/// Ordered, read-only set of registered entities.
#[derive(Default)]
pub struct EntityRegistry {
    entries: Vec<RegisteredEntity>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Fails on a duplicate name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        accessor: Arc<dyn SourceAccessor>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.entries.push(RegisteredEntity { name, accessor });
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredEntity> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entities in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredEntity> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
