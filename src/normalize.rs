// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record normalization.
//!
//! Converts a raw primary-store record into a plain, JSON-safe tree and
//! extracts the three standardized fields the mirror keys on:
//! the source id and the source's own audit timestamps.
//!
//! Flattening rules:
//! - `Null` → JSON null
//! - scalars pass through
//! - `Date` → RFC 3339 string
//! - `Reference` → canonical hex string
//! - `Sequence` → element-wise recursion
//! - `Record` → key-wise recursion
//!
//! A record without a usable `_id` is *unmirrorable*: [`normalize`] returns
//! `None` and callers skip the record. That is a valid outcome, not an error.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::value::RawValue;

/// Field holding the primary-store identifier.
pub const ID_FIELD: &str = "_id";
/// Conventional audit fields on source records.
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A record ready for the mirror store, keyed by `(entity, source_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Stringified primary-store identifier.
    pub source_id: String,
    /// Source record's own creation timestamp, if present and parseable.
    pub source_created_at: Option<DateTime<Utc>>,
    /// Source record's own update timestamp, if present and parseable.
    pub source_updated_at: Option<DateTime<Utc>>,
    /// Fully flattened record: only null/bool/number/string/array/object.
    pub data: Value,
}

/// Normalize a raw record. Pure; no store access, no side effects.
///
/// Returns `None` when the input is not a record or carries no usable
/// identifier. Audit timestamps that are missing or not dates become `None`;
/// they are never invented.
#[must_use]
pub fn normalize(raw: &RawValue) -> Option<NormalizedRecord> {
    let fields = raw.as_record()?;

    let source_id = match fields.get(ID_FIELD) {
        Some(RawValue::Reference(id)) => id.to_hex(),
        Some(RawValue::String(s)) if !s.is_empty() => s.clone(),
        _ => return None,
    };

    Some(NormalizedRecord {
        source_id,
        source_created_at: date_field(fields.get(CREATED_AT_FIELD)),
        source_updated_at: date_field(fields.get(UPDATED_AT_FIELD)),
        data: flatten(raw),
    })
}

fn date_field(value: Option<&RawValue>) -> Option<DateTime<Utc>> {
    match value {
        Some(RawValue::Date(dt)) => Some(*dt),
        _ => None,
    }
}

/// Recursively flatten a raw value into plain JSON.
#[must_use]
pub fn flatten(raw: &RawValue) -> Value {
    match raw {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Int(i) => Value::Number(Number::from(*i)),
        // Non-finite floats have no JSON form; they degrade to null.
        RawValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        RawValue::String(s) => Value::String(s.clone()),
        RawValue::Date(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        RawValue::Reference(id) => Value::String(id.to_hex()),
        RawValue::Sequence(items) => Value::Array(items.iter().map(flatten).collect()),
        RawValue::Record(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (key, value) in fields {
                map.insert(key.clone(), flatten(value));
            }
            Value::Object(map)
        }
    }
}
