// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Change tracking between two persistence cycles.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::RowId;

/// What happened to a single row since the last consumed change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowChange {
    /// Fields written (or removed by a wholesale replace)
    pub fields: BTreeSet<String>,
    /// Whether the row no longer exists
    pub deleted: bool,
}

/// Rows and global values changed since the last call to
/// [`Store::take_changes`](crate::Store::take_changes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    tables: BTreeMap<String, BTreeMap<RowId, RowChange>>,
    values: BTreeSet<String>,
}

impl ChangeSet {
    /// Check whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.values.is_empty()
    }

    /// Iterate over changed collections and their row changes.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &BTreeMap<RowId, RowChange>)> {
        self.tables.iter().map(|(name, rows)| (name.as_str(), rows))
    }

    /// Row changes for one collection.
    pub fn table(&self, collection: &str) -> Option<&BTreeMap<RowId, RowChange>> {
        self.tables.get(collection)
    }

    /// Change for a single row.
    pub fn row(&self, collection: &str, row_id: &str) -> Option<&RowChange> {
        self.tables.get(collection)?.get(row_id)
    }

    /// Keys of global values that changed.
    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    /// Whether any global value changed.
    pub fn values_changed(&self) -> bool {
        !self.values.is_empty()
    }

    /// Total number of changed rows across all collections.
    pub fn changed_row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Fold a newer change set into this one.
    ///
    /// The newer set decides whether a row is deleted; changed fields
    /// accumulate.
    pub fn merge(&mut self, newer: ChangeSet) {
        for (collection, rows) in newer.tables {
            let table = self.tables.entry(collection).or_default();
            for (row_id, change) in rows {
                let entry = table.entry(row_id).or_default();
                entry.fields.extend(change.fields);
                entry.deleted = change.deleted;
            }
        }
        self.values.extend(newer.values);
    }

    pub(crate) fn record_row(
        &mut self,
        collection: &str,
        row_id: &str,
        fields: impl IntoIterator<Item = String>,
    ) {
        let change = self.entry(collection, row_id);
        change.fields.extend(fields);
        change.deleted = false;
    }

    pub(crate) fn record_delete(&mut self, collection: &str, row_id: &str) {
        self.entry(collection, row_id).deleted = true;
    }

    pub(crate) fn record_value(&mut self, key: &str) {
        self.values.insert(key.to_owned());
    }

    fn entry(&mut self, collection: &str, row_id: &str) -> &mut RowChange {
        self.tables
            .entry(collection.to_owned())
            .or_default()
            .entry(row_id.to_owned())
            .or_default()
    }
}
