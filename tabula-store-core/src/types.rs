// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Row and table types shared by the store, index and relationship layers.

use std::collections::BTreeMap;

pub use serde_json::Value;

/// One record: an ordered mapping from field name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Opaque row identifier, unique within a collection.
pub type RowId = String;

/// All rows of one collection.
pub type Table = BTreeMap<RowId, Row>;

/// All collections of a store.
pub type Tables = BTreeMap<String, Table>;

/// Global values stored outside any collection.
pub type Values = serde_json::Map<String, Value>;

/// Bucket key used by indexes for a field value.
///
/// Returns `None` for `null`, which is never indexed. Numbers compare by
/// value, so `1` and `1.0` share a bucket. Other values are keyed by
/// their compact JSON text, so `"1"` and `1` land in different buckets.
pub fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("s:{s}")),
        Value::Number(n) => Some(format!("n:{}", number_key(n))),
        other => Some(format!("j:{other}")),
    }
}

/// Integral floats in `i64` range are written as integers.
fn number_key(n: &serde_json::Number) -> String {
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f) => {
            (f as i64).to_string()
        }
        _ => n.to_string(),
    }
}
