// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The record store: collections of rows plus global values.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use crate::changes::ChangeSet;
use crate::types::{Row, RowId, Table, Tables, Value, Values};

/// Receives every row mutation synchronously while the store's write lock
/// is held.
///
/// Implementations must not call back into the [`Store`]; they exist to
/// keep derived state (indexes) consistent with the write that triggered
/// them.
pub trait StoreObserver: Send + Sync {
    /// A row was created, replaced, merged into or deleted.
    fn row_changed(&self, collection: &str, row_id: &str, old: Option<&Row>, new: Option<&Row>);

    /// The whole content was replaced (e.g. after loading from disk).
    fn content_replaced(&self, tables: &Tables);
}

#[derive(Default)]
struct StoreState {
    tables: Tables,
    values: Values,
    changes: ChangeSet,
    observers: Vec<Weak<dyn StoreObserver>>,
}

impl StoreState {
    fn emit(&mut self, collection: &str, row_id: &str, old: Option<&Row>) {
        self.observers.retain(|o| o.strong_count() > 0);
        let new = self.tables.get(collection).and_then(|t| t.get(row_id));
        for observer in self.observers.iter().filter_map(Weak::upgrade) {
            observer.row_changed(collection, row_id, old, new);
        }
    }
}

/// Shared handle to an in-memory record store.
///
/// Cloning is cheap; all clones see the same data. Rows never exist with
/// zero fields: writing an empty row deletes it, so a present row always
/// carries at least one field.
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Store")
            .field("tables", &state.tables.len())
            .field("values", &state.values.len())
            .finish()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for row mutations.
    ///
    /// The store only keeps a weak reference; dropping the observer
    /// unregisters it.
    pub fn observe(&self, observer: Weak<dyn StoreObserver>) {
        self.state.write().observers.push(observer);
    }

    // ---- rows ----

    /// Replace a row wholesale. An empty row deletes it.
    pub fn set_row(&self, collection: &str, row_id: &str, row: Row) {
        if row.is_empty() {
            self.del_row(collection, row_id);
            return;
        }

        let mut state = self.state.write();
        let mut fields: BTreeSet<String> = row.keys().cloned().collect();
        let old = state
            .tables
            .entry(collection.to_owned())
            .or_default()
            .insert(row_id.to_owned(), row);
        if let Some(old) = &old {
            // Fields dropped by the replace changed too.
            fields.extend(old.keys().cloned());
        }
        state.changes.record_row(collection, row_id, fields);
        state.emit(collection, row_id, old.as_ref());
        trace!(collection, row_id, "set row");
    }

    /// Merge fields into an existing row without removing omitted fields.
    ///
    /// Returns `false` and changes nothing if the row does not exist.
    pub fn set_partial_row(&self, collection: &str, row_id: &str, partial: Row) -> bool {
        let mut state = self.state.write();
        let Some(row) = state
            .tables
            .get_mut(collection)
            .and_then(|t| t.get_mut(row_id))
        else {
            return false;
        };
        if partial.is_empty() {
            return true;
        }

        let old = row.clone();
        let fields: Vec<String> = partial.keys().cloned().collect();
        row.extend(partial);
        state.changes.record_row(collection, row_id, fields);
        state.emit(collection, row_id, Some(&old));
        trace!(collection, row_id, "merged partial row");
        true
    }

    /// Get a copy of a row, or `None` if it does not exist.
    pub fn row(&self, collection: &str, row_id: &str) -> Option<Row> {
        self.state.read().tables.get(collection)?.get(row_id).cloned()
    }

    /// Get a single field of a row.
    pub fn cell(&self, collection: &str, row_id: &str, field: &str) -> Option<Value> {
        self.state
            .read()
            .tables
            .get(collection)?
            .get(row_id)?
            .get(field)
            .cloned()
    }

    /// Check whether a row exists.
    pub fn has_row(&self, collection: &str, row_id: &str) -> bool {
        self.state
            .read()
            .tables
            .get(collection)
            .is_some_and(|t| t.contains_key(row_id))
    }

    /// Delete a row. Returns `false` if it did not exist.
    pub fn del_row(&self, collection: &str, row_id: &str) -> bool {
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(collection) else {
            return false;
        };
        let Some(old) = table.remove(row_id) else {
            return false;
        };
        if table.is_empty() {
            state.tables.remove(collection);
        }
        state.changes.record_delete(collection, row_id);
        state.emit(collection, row_id, Some(&old));
        trace!(collection, row_id, "deleted row");
        true
    }

    // ---- tables ----

    /// Get a copy of every row in a collection. Unknown collections are
    /// empty.
    pub fn table(&self, collection: &str) -> Table {
        self.state
            .read()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Run `f` against a collection while holding the read lock.
    pub fn with_table<R>(&self, collection: &str, f: impl FnOnce(Option<&Table>) -> R) -> R {
        f(self.state.read().tables.get(collection))
    }

    /// Get a copy of all collections.
    pub fn tables(&self) -> Tables {
        self.state.read().tables.clone()
    }

    /// Names of collections holding at least one row.
    pub fn table_names(&self) -> Vec<String> {
        self.state.read().tables.keys().cloned().collect()
    }

    /// Row IDs of a collection.
    pub fn row_ids(&self, collection: &str) -> Vec<RowId> {
        self.state
            .read()
            .tables
            .get(collection)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows in a collection.
    pub fn row_count(&self, collection: &str) -> usize {
        self.state
            .read()
            .tables
            .get(collection)
            .map_or(0, Table::len)
    }

    // ---- values ----

    /// Get a global value.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.state.read().values.get(key).cloned()
    }

    /// Set a global value.
    pub fn set_value(&self, key: &str, value: Value) {
        let mut state = self.state.write();
        state.values.insert(key.to_owned(), value);
        state.changes.record_value(key);
    }

    /// Delete a global value. Returns `false` if it did not exist.
    pub fn del_value(&self, key: &str) -> bool {
        let mut state = self.state.write();
        if state.values.remove(key).is_none() {
            return false;
        }
        state.changes.record_value(key);
        true
    }

    /// Get a copy of all global values.
    pub fn values(&self) -> Values {
        self.state.read().values.clone()
    }

    // ---- bulk ----

    /// Replace the entire content of the store.
    ///
    /// Nothing is recorded as changed and any pending change set is
    /// discarded: the new content is assumed to match what is persisted.
    pub fn set_content(&self, mut tables: Tables, values: Values) {
        for table in tables.values_mut() {
            table.retain(|_, row| !row.is_empty());
        }
        tables.retain(|_, table| !table.is_empty());

        let mut state = self.state.write();
        state.tables = tables;
        state.values = values;
        state.changes = ChangeSet::default();
        state.observers.retain(|o| o.strong_count() > 0);
        for observer in state.observers.iter().filter_map(Weak::upgrade) {
            observer.content_replaced(&state.tables);
        }
    }

    // ---- change feed ----

    /// Take every change recorded since the previous call.
    pub fn take_changes(&self) -> ChangeSet {
        std::mem::take(&mut self.state.write().changes)
    }

    /// Put back a change set that could not be consumed, merging it with
    /// anything recorded since it was taken.
    pub fn restore_changes(&self, unconsumed: ChangeSet) {
        let mut state = self.state.write();
        let newer = std::mem::take(&mut state.changes);
        let mut merged = unconsumed;
        merged.merge(newer);
        state.changes = merged;
    }

    /// Whether changes are pending.
    pub fn has_changes(&self) -> bool {
        !self.state.read().changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_set_and_get_row() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"email": "a@x.com", "name": "Alice"})));

        assert_eq!(
            store.row("users", "u1"),
            Some(row(json!({"email": "a@x.com", "name": "Alice"})))
        );
        assert!(store.has_row("users", "u1"));
        assert_eq!(store.row("users", "u2"), None);
        assert_eq!(store.row("teams", "u1"), None);
    }

    #[test]
    fn test_set_row_replaces_wholesale() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"email": "a@x.com", "name": "Alice"})));
        store.set_row("users", "u1", row(json!({"name": "Bob"})));

        assert_eq!(store.row("users", "u1"), Some(row(json!({"name": "Bob"}))));
    }

    #[test]
    fn test_empty_row_is_absent() {
        let store = Store::new();
        store.set_row("users", "u1", Row::new());
        assert!(!store.has_row("users", "u1"));

        store.set_row("users", "u1", row(json!({"name": "Alice"})));
        store.set_row("users", "u1", Row::new());
        assert!(!store.has_row("users", "u1"));
        assert!(store.table_names().is_empty());
    }

    #[test]
    fn test_partial_row_merges() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"email": "a@x.com", "name": "Alice"})));

        assert!(store.set_partial_row("users", "u1", row(json!({"name": "Alicia"}))));
        assert_eq!(
            store.row("users", "u1"),
            Some(row(json!({"email": "a@x.com", "name": "Alicia"})))
        );
    }

    #[test]
    fn test_partial_row_on_absent_row_is_noop() {
        let store = Store::new();
        assert!(!store.set_partial_row("users", "ghost", row(json!({"name": "x"}))));
        assert!(!store.has_row("users", "ghost"));
        assert!(!store.has_changes());
    }

    #[test]
    fn test_delete_row() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"name": "Alice"})));

        assert!(store.del_row("users", "u1"));
        assert!(!store.del_row("users", "u1"));
        assert!(!store.del_row("nowhere", "u1"));
        assert_eq!(store.row_count("users"), 0);
    }

    #[test]
    fn test_table_and_row_ids() {
        let store = Store::new();
        store.set_row("users", "u2", row(json!({"name": "Bob"})));
        store.set_row("users", "u1", row(json!({"name": "Alice"})));
        store.set_row("teams", "t1", row(json!({"name": "Core"})));

        assert_eq!(store.table("users").len(), 2);
        assert!(store.table("projects").is_empty());
        assert_eq!(store.row_ids("users"), vec!["u1", "u2"]);
        assert_eq!(store.table_names(), vec!["teams", "users"]);
        assert_eq!(store.cell("users", "u2", "name"), Some(json!("Bob")));
        assert_eq!(store.cell("users", "u2", "email"), None);
    }

    #[test]
    fn test_values() {
        let store = Store::new();
        assert_eq!(store.value("schemaVersion"), None);

        store.set_value("schemaVersion", json!(3));
        assert_eq!(store.value("schemaVersion"), Some(json!(3)));
        assert!(store.del_value("schemaVersion"));
        assert!(!store.del_value("schemaVersion"));
        assert!(store.values().is_empty());
    }

    #[test]
    fn test_change_feed() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"email": "a@x.com", "name": "Alice"})));
        store.set_row("users", "u2", row(json!({"name": "Bob"})));
        store.set_value("schemaVersion", json!(1));

        let changes = store.take_changes();
        assert_eq!(changes.changed_row_count(), 2);
        assert!(changes.values().contains("schemaVersion"));
        let u1 = changes.row("users", "u1").unwrap();
        assert!(!u1.deleted);
        assert!(u1.fields.contains("email") && u1.fields.contains("name"));

        // Consumed
        assert!(store.take_changes().is_empty());

        store.set_partial_row("users", "u1", row(json!({"name": "Alicia"})));
        store.del_row("users", "u2");
        let changes = store.take_changes();
        assert_eq!(
            changes.row("users", "u1").unwrap().fields,
            BTreeSet::from(["name".to_string()])
        );
        assert!(changes.row("users", "u2").unwrap().deleted);
        assert!(!changes.values_changed());
    }

    #[test]
    fn test_replace_records_dropped_fields() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"email": "a@x.com", "name": "Alice"})));
        store.take_changes();

        store.set_row("users", "u1", row(json!({"name": "Alice"})));
        let changes = store.take_changes();
        assert!(changes.row("users", "u1").unwrap().fields.contains("email"));
    }

    #[test]
    fn test_restore_changes() {
        let store = Store::new();
        store.set_row("users", "u1", row(json!({"name": "Alice"})));
        let failed = store.take_changes();

        store.set_row("users", "u2", row(json!({"name": "Bob"})));
        store.restore_changes(failed);

        let changes = store.take_changes();
        assert!(changes.row("users", "u1").is_some());
        assert!(changes.row("users", "u2").is_some());
    }

    #[test]
    fn test_set_content_resets_changes() {
        let store = Store::new();
        store.set_row("users", "stale", row(json!({"name": "Stale"})));

        let mut tables = Tables::new();
        tables
            .entry("users".to_string())
            .or_default()
            .insert("u1".to_string(), row(json!({"name": "Alice"})));
        tables
            .entry("teams".to_string())
            .or_default()
            .insert("t1".to_string(), Row::new());
        store.set_content(tables, row(json!({"schemaVersion": 2})));

        assert!(!store.has_changes());
        assert!(!store.has_row("users", "stale"));
        assert!(store.has_row("users", "u1"));
        assert_eq!(store.table_names(), vec!["users"]);
        assert_eq!(store.value("schemaVersion"), Some(json!(2)));
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, String, bool, bool)>>,
        resets: Mutex<usize>,
    }

    impl StoreObserver for Recorder {
        fn row_changed(&self, collection: &str, row_id: &str, old: Option<&Row>, new: Option<&Row>) {
            self.events.lock().unwrap().push((
                collection.to_string(),
                row_id.to_string(),
                old.is_some(),
                new.is_some(),
            ));
        }

        fn content_replaced(&self, _tables: &Tables) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_observer_sees_mutations() {
        let store = Store::new();
        let recorder = Arc::new(Recorder::default());
        let observer: Arc<dyn StoreObserver> = recorder.clone();
        store.observe(Arc::downgrade(&observer));

        store.set_row("users", "u1", row(json!({"name": "Alice"})));
        store.set_partial_row("users", "u1", row(json!({"email": "a@x.com"})));
        store.del_row("users", "u1");
        store.set_content(Tables::new(), Values::new());

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("users".into(), "u1".into(), false, true),
                ("users".into(), "u1".into(), true, true),
                ("users".into(), "u1".into(), true, false),
            ]
        );
        assert_eq!(*recorder.resets.lock().unwrap(), 1);
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let store = Store::new();
        let observer: Arc<dyn StoreObserver> = Arc::new(Recorder::default());
        store.observe(Arc::downgrade(&observer));
        drop(observer);

        store.set_row("users", "u1", row(json!({"name": "Alice"})));
        assert!(store.state.read().observers.is_empty());
    }
}
