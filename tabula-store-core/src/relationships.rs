// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Foreign-key navigation between two collections.
//!
//! A relationship is a read-time view: the remote side is read straight
//! from the local row, the local side is one index slice. Nothing is
//! stored that could drift from the rows themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::indexes::Indexes;
use crate::store::Store;
use crate::types::{Row, RowId, Value};

/// A `local.foreign_key → remote row ID` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDefinition {
    /// Collection holding the foreign key
    pub local_collection: String,
    /// Collection the foreign key points into
    pub remote_collection: String,
    /// Field on the local rows holding the remote row ID
    pub foreign_key: String,
}

/// Name of the index backing a relationship.
fn backing_index(relationship_id: &str) -> String {
    format!("__relationship:{relationship_id}")
}

/// Relationship definitions over a [`Store`] and its [`Indexes`].
#[derive(Clone, Debug)]
pub struct Relationships {
    store: Store,
    indexes: Indexes,
    definitions: Arc<RwLock<BTreeMap<String, RelationshipDefinition>>>,
}

impl Relationships {
    /// Create an empty relationship set.
    pub fn new(store: &Store, indexes: &Indexes) -> Self {
        Self {
            store: store.clone(),
            indexes: indexes.clone(),
            definitions: Arc::default(),
        }
    }

    /// Register (or replace) a relationship.
    pub fn set_relationship_definition(
        &self,
        relationship_id: &str,
        local_collection: &str,
        remote_collection: &str,
        foreign_key: &str,
    ) {
        self.indexes.set_index_definition(
            &backing_index(relationship_id),
            local_collection,
            foreign_key,
        );
        self.definitions.write().insert(
            relationship_id.to_owned(),
            RelationshipDefinition {
                local_collection: local_collection.to_owned(),
                remote_collection: remote_collection.to_owned(),
                foreign_key: foreign_key.to_owned(),
            },
        );
    }

    /// Remove a relationship. Returns `false` if it did not exist.
    pub fn del_relationship_definition(&self, relationship_id: &str) -> bool {
        let removed = self.definitions.write().remove(relationship_id).is_some();
        if removed {
            self.indexes
                .del_index_definition(&backing_index(relationship_id));
        }
        removed
    }

    /// Names of all registered relationships.
    pub fn relationship_ids(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    /// Definition of a relationship.
    pub fn relationship_definition(&self, relationship_id: &str) -> Option<RelationshipDefinition> {
        self.definitions.read().get(relationship_id).cloned()
    }

    /// The remote row ID a local row points to.
    ///
    /// `None` when the relationship is unknown, the local row is absent, or
    /// its foreign key is unset or not a string. The target row is not
    /// required to exist; see [`remote_row`](Self::remote_row).
    pub fn remote_row_id(&self, relationship_id: &str, local_row_id: &str) -> Option<RowId> {
        let definition = self.relationship_definition(relationship_id)?;
        match self.store.cell(
            &definition.local_collection,
            local_row_id,
            &definition.foreign_key,
        )? {
            Value::String(remote) => Some(remote),
            _ => None,
        }
    }

    /// The remote row a local row points to, `None` if it is dangling.
    pub fn remote_row(&self, relationship_id: &str, local_row_id: &str) -> Option<Row> {
        let definition = self.relationship_definition(relationship_id)?;
        let remote_row_id = self.remote_row_id(relationship_id, local_row_id)?;
        self.store
            .row(&definition.remote_collection, &remote_row_id)
    }

    /// Local rows whose foreign key equals `remote_row_id`.
    pub fn local_row_ids(&self, relationship_id: &str, remote_row_id: &str) -> Vec<RowId> {
        if !self.definitions.read().contains_key(relationship_id) {
            return Vec::new();
        }
        self.indexes
            .slice_row_ids(&backing_index(relationship_id), remote_row_id)
    }
}
