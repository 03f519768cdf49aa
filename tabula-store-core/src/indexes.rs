// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Secondary indexes: field value → row IDs.
//!
//! Buckets are maintained incrementally through a [`StoreObserver`], so a
//! lookup right after a write already sees it. Lock order is always store
//! first, index state second.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::store::{Store, StoreObserver};
use crate::types::{Row, RowId, Table, Tables, Value, index_key};

/// Which collection field an index covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Indexed collection
    pub collection: String,
    /// Indexed field
    pub field: String,
}

#[derive(Debug, Default)]
struct Bucket {
    value: Value,
    row_ids: BTreeSet<RowId>,
}

#[derive(Debug, Default)]
struct Index {
    definition: Option<IndexDefinition>,
    buckets: BTreeMap<String, Bucket>,
}

impl Index {
    fn build(definition: IndexDefinition, table: Option<&Table>) -> Self {
        let mut index = Index {
            definition: Some(definition),
            buckets: BTreeMap::new(),
        };
        for (row_id, row) in table.into_iter().flatten() {
            index.insert(row_id, row);
        }
        index
    }

    fn field(&self) -> &str {
        self.definition.as_ref().map_or("", |d| d.field.as_str())
    }

    fn insert(&mut self, row_id: &str, row: &Row) {
        let Some(value) = row.get(self.field()).cloned() else {
            return;
        };
        let Some(key) = index_key(&value) else {
            return;
        };
        self.buckets
            .entry(key)
            .or_insert_with(|| Bucket {
                value,
                row_ids: BTreeSet::new(),
            })
            .row_ids
            .insert(row_id.to_owned());
    }

    fn remove(&mut self, row_id: &str, row: &Row) {
        let Some(key) = row.get(self.field()).and_then(index_key) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.row_ids.remove(row_id);
            if bucket.row_ids.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    indexes: BTreeMap<String, Index>,
}

impl StoreObserver for RwLock<IndexState> {
    fn row_changed(&self, collection: &str, row_id: &str, old: Option<&Row>, new: Option<&Row>) {
        let mut state = self.write();
        for index in state.indexes.values_mut() {
            if index
                .definition
                .as_ref()
                .is_none_or(|d| d.collection != collection)
            {
                continue;
            }
            let field = index.field();
            let old_value = old.and_then(|r| r.get(field));
            let new_value = new.and_then(|r| r.get(field));
            if old_value == new_value {
                continue;
            }
            if let Some(old) = old {
                index.remove(row_id, old);
            }
            if let Some(new) = new {
                index.insert(row_id, new);
            }
        }
    }

    fn content_replaced(&self, tables: &Tables) {
        let mut state = self.write();
        for index in state.indexes.values_mut() {
            if let Some(definition) = index.definition.take() {
                let table = tables.get(&definition.collection);
                *index = Index::build(definition, table);
            }
        }
    }
}

/// Secondary indexes over a [`Store`].
///
/// Cloning is cheap; clones share definitions and buckets.
#[derive(Clone)]
pub struct Indexes {
    store: Store,
    state: Arc<RwLock<IndexState>>,
}

impl std::fmt::Debug for Indexes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexes")
            .field("indexes", &self.index_ids())
            .finish()
    }
}

impl Indexes {
    /// Create an empty index set attached to `store`.
    pub fn new(store: &Store) -> Self {
        let state = Arc::new(RwLock::new(IndexState::default()));
        let observer: Arc<dyn StoreObserver> = state.clone();
        store.observe(Arc::downgrade(&observer));
        Self {
            store: store.clone(),
            state,
        }
    }

    /// The store these indexes are attached to.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register (or replace) an index.
    ///
    /// Re-registering the same definition is a no-op; a different
    /// definition under the same name replaces the old one and rebuilds
    /// its buckets.
    pub fn set_index_definition(&self, index_id: &str, collection: &str, field: &str) {
        let definition = IndexDefinition {
            collection: collection.to_owned(),
            field: field.to_owned(),
        };
        // Hold the store read lock across the build so no write slips in
        // between the scan and the registration.
        self.store.with_table(collection, |table| {
            let mut state = self.state.write();
            if state
                .indexes
                .get(index_id)
                .is_some_and(|i| i.definition.as_ref() == Some(&definition))
            {
                return;
            }
            debug!(index_id, collection, field, "building index");
            state
                .indexes
                .insert(index_id.to_owned(), Index::build(definition, table));
        });
    }

    /// Remove an index. Returns `false` if it did not exist.
    pub fn del_index_definition(&self, index_id: &str) -> bool {
        self.state.write().indexes.remove(index_id).is_some()
    }

    /// Names of all registered indexes.
    pub fn index_ids(&self) -> Vec<String> {
        self.state.read().indexes.keys().cloned().collect()
    }

    /// Definition of an index.
    pub fn index_definition(&self, index_id: &str) -> Option<IndexDefinition> {
        self.state
            .read()
            .indexes
            .get(index_id)
            .and_then(|i| i.definition.clone())
    }

    /// Row IDs whose indexed field currently equals `value`.
    ///
    /// Unknown indexes and `null` values yield an empty result.
    pub fn slice_row_ids(&self, index_id: &str, value: impl Into<Value>) -> Vec<RowId> {
        let Some(key) = index_key(&value.into()) else {
            return Vec::new();
        };
        self.state
            .read()
            .indexes
            .get(index_id)
            .and_then(|i| i.buckets.get(&key))
            .map(|b| b.row_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct values currently present in an index.
    pub fn slice_keys(&self, index_id: &str) -> Vec<Value> {
        self.state
            .read()
            .indexes
            .get(index_id)
            .map(|i| i.buckets.values().map(|b| b.value.clone()).collect())
            .unwrap_or_default()
    }
}
