// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Raw value model produced by primary-store accessors.
//!
//! The primary store is schema-flexible: records may contain nested records,
//! sequences, native dates, and an opaque reference type used for both primary
//! and foreign keys. Accessors lower everything into this closed tagged set so
//! the normalizer can pattern-match instead of probing for methods. Virtual or
//! populated fields must already be resolved to their plain form by the
//! accessor before they reach this type.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Opaque primary-store identifier (12 raw bytes).
///
/// Canonical form is the 24-character lowercase hex rendering, which is what
/// the mirror stores for both `source_id` and flattened foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(pub [u8; 12]);

impl RefId {
    /// Canonical 24-char lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(24);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// Parse from canonical hex form. Returns `None` for anything that is not
    /// exactly 24 hex characters.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A value as emitted by a primary-store accessor.
///
/// Records use a `BTreeMap` so two structurally equal records always render
/// identically (the normalizer is required to be deterministic).
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Native date value; flattened to an RFC 3339 string.
    Date(DateTime<Utc>),
    /// Opaque identifier; flattened to its canonical hex string.
    Reference(RefId),
    Sequence(Vec<RawValue>),
    Record(BTreeMap<String, RawValue>),
}

impl RawValue {
    /// Convenience constructor for record values.
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, RawValue)>,
        K: Into<String>,
    {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns the record fields if this is a record.
    #[must_use]
    pub fn as_record(&self) -> Option<&BTreeMap<String, RawValue>> {
        match self {
            Self::Record(fields) => Some(fields),
            _ => None,
        }
    }
}
