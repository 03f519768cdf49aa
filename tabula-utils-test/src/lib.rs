// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Test utilities for Tabula.
//!
//! This crate provides temp directories, row builders and proptest
//! strategies shared by the Tabula crates' tests. It deliberately does not
//! depend on the store crates so they can use it as a dev-dependency.

use std::path::{Path, PathBuf};

use proptest::prelude::*;
use serde_json::{Map, Value};
use tempfile::TempDir;

/// A wrapper around TempDir that provides a canonicalized path.
/// This resolves symlinks like /var -> /private/var on macOS, so paths
/// reported by filesystem watchers compare equal to the ones we build.
pub struct CanonicalTempDir {
    _inner: TempDir,
    path: PathBuf,
}

impl CanonicalTempDir {
    /// Create a new temporary directory with a canonicalized path.
    pub fn new() -> std::io::Result<Self> {
        let inner = TempDir::new()?;
        let path = inner.path().canonicalize()?;
        Ok(Self {
            _inner: inner,
            path,
        })
    }

    /// Get the canonicalized path to the temporary directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A not-yet-existing data directory inside the temp dir.
    pub fn data_path(&self) -> PathBuf {
        self.path.join("data")
    }
}

/// Build a row from a `json!` object literal.
///
/// Panics if `value` is not an object; only meant for tests.
pub fn row(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Collections used by generated operations.
pub const TEST_COLLECTIONS: &[&str] = &["users", "teams", "scratch"];

/// Fields used by generated rows.
pub const TEST_FIELDS: &[&str] = &["email", "name", "organisationId", "status"];

/// A generated store mutation.
#[derive(Debug, Clone)]
pub enum Op {
    /// Replace a row
    Set {
        collection: String,
        row_id: String,
        row: Map<String, Value>,
    },
    /// Merge into a row
    Partial {
        collection: String,
        row_id: String,
        row: Map<String, Value>,
    },
    /// Delete a row
    Delete { collection: String, row_id: String },
    /// Set a global value
    SetValue { key: String, value: Value },
    /// Persist what has changed so far
    Save,
}

pub fn arb_row_id() -> impl Strategy<Value = String> {
    // Small alphabet so operations collide on the same rows.
    "[a-d][0-3]"
}

pub fn arb_collection() -> impl Strategy<Value = String> {
    proptest::sample::select(TEST_COLLECTIONS).prop_map(str::to_owned)
}

/// JSON scalars that survive a JSON round trip unchanged.
pub fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::from),
        "[a-c]{0,3}".prop_map(Value::String),
    ]
}

prop_compose! {
    pub fn arb_row()(
        fields in proptest::collection::btree_map(
            proptest::sample::select(TEST_FIELDS),
            arb_scalar(),
            0..TEST_FIELDS.len(),
        )
    ) -> Map<String, Value> {
        fields.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }
}

pub fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (arb_collection(), arb_row_id(), arb_row())
            .prop_map(|(collection, row_id, row)| Op::Set { collection, row_id, row }),
        2 => (arb_collection(), arb_row_id(), arb_row())
            .prop_map(|(collection, row_id, row)| Op::Partial { collection, row_id, row }),
        2 => (arb_collection(), arb_row_id())
            .prop_map(|(collection, row_id)| Op::Delete { collection, row_id }),
        1 => ("[a-b]", arb_scalar()).prop_map(|(key, value)| Op::SetValue { key, value }),
        1 => Just(Op::Save),
    ]
}

pub fn arb_ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(arb_op(), 0..max_len)
}
