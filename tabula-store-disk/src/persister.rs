// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Mirrors a [`Store`] to a directory of JSON files and back.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabula_store_core::{ChangeSet, Row, Store, Table, Tables, Value, Values};
use tracing::{debug, warn};

use crate::atomic::{remove_if_exists, write_atomic};
use crate::auto_save::AutoSave;
use crate::error::{Error, IoContext, Result};
use crate::layout::{DataLayout, INDICES_DIR, is_temp_file, row_id_from_path, validate_row_id};
use crate::watcher::{ExternalChange, ExternalChangeWatcher};

/// Default period between two auto-saves.
pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(2);

/// A collection that is persisted, with the fields that get index files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub name: String,
    pub indexed_fields: Vec<String>,
}

impl CollectionConfig {
    pub fn new<I, S>(name: impl Into<String>, indexed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            indexed_fields: indexed_fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// What to persist and where.
#[derive(Debug, Clone)]
pub struct PersisterConfig {
    pub data_path: PathBuf,
    pub collections: Vec<CollectionConfig>,
    pub auto_save_interval: Duration,
}

impl PersisterConfig {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            collections: Vec::new(),
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
        }
    }

    /// Add a persisted collection.
    pub fn collection<I, S>(mut self, name: impl Into<String>, indexed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections
            .push(CollectionConfig::new(name, indexed_fields));
        self
    }

    pub fn auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }
}

/// Summary of one save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub rows_written: usize,
    /// Record files actually removed
    pub rows_deleted: usize,
    pub index_files_written: usize,
    pub values_written: bool,
    /// Whether this was a full save
    pub full: bool,
}

impl SaveStats {
    /// Whether nothing touched the disk.
    pub fn is_empty(&self) -> bool {
        self.rows_written == 0
            && self.rows_deleted == 0
            && self.index_files_written == 0
            && !self.values_written
    }
}

/// One line of an index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: Value,
    #[serde(rename = "rowId")]
    pub row_id: String,
}

#[derive(Serialize)]
struct IndexLine<'a> {
    key: &'a Value,
    #[serde(rename = "rowId")]
    row_id: &'a str,
}

#[derive(Debug, Default)]
struct SaveState {
    saved_once: bool,
}

pub(crate) struct Inner {
    store: Store,
    layout: DataLayout,
    /// Collection name → indexed fields
    collections: BTreeMap<String, Vec<String>>,
    auto_save_interval: Duration,
    /// Serializes loads, saves and temp file cleanup
    save_lock: tokio::sync::Mutex<SaveState>,
    auto_save: parking_lot::Mutex<Option<AutoSave>>,
    watcher: parking_lot::Mutex<Option<ExternalChangeWatcher>>,
}

/// Loads and saves a [`Store`] under a data directory.
///
/// Cloning is cheap; clones share the auto-save task and save lock.
#[derive(Clone)]
pub struct Persister {
    inner: Arc<Inner>,
}

/// Non-owning handle held by the auto-save task.
#[derive(Clone)]
pub(crate) struct WeakPersister(Weak<Inner>);

impl WeakPersister {
    pub(crate) fn upgrade(&self) -> Option<Persister> {
        self.0.upgrade().map(|inner| Persister { inner })
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("data_path", &self.inner.layout.root())
            .field("collections", &self.inner.collections.keys())
            .field("auto_save_interval", &self.inner.auto_save_interval)
            .finish()
    }
}

fn decode_object(path: &Path, bytes: &[u8]) -> Result<Row> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(Error::InvalidRecord {
            path: path.to_owned(),
        }),
        Err(source) => Err(Error::Json {
            path: path.to_owned(),
            source,
        }),
    }
}

fn encode_pretty(path: &Path, value: &impl Serialize) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| Error::Encode {
        path: path.to_owned(),
        source,
    })
}

/// JSONL body of an index file, rows in ID order. Rows that cannot
/// have a record file are left out.
fn encode_index(path: &Path, field: &str, table: Option<&Table>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (row_id, row) in table.into_iter().flatten() {
        if validate_row_id(row_id).is_err() {
            continue;
        }
        let Some(key) = row.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        serde_json::to_writer(&mut out, &IndexLine { key, row_id }).map_err(|source| {
            Error::Encode {
                path: path.to_owned(),
                source,
            }
        })?;
        out.push(b'\n');
    }
    Ok(out)
}

async fn dir_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .io_context(|| format!("Failed to stat {}", path.display()))
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .io_context(|| format!("Failed to create directory {}", path.display()))
}

/// Open a directory for listing, `None` if it does not exist.
async fn read_dir(path: &Path) -> Result<Option<tokio::fs::ReadDir>> {
    match tokio::fs::read_dir(path).await {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).io_context(|| format!("Failed to read directory {}", path.display())),
    }
}

/// Committed record files in a collection directory.
async fn list_records(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let Some(mut entries) = read_dir(dir).await? else {
        return Ok(Vec::new());
    };
    let mut records = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .io_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let path = entry.path();
        let Some(row_id) = row_id_from_path(&path).map(str::to_owned) else {
            continue;
        };
        let file_type = entry
            .file_type()
            .await
            .io_context(|| format!("Failed to stat {}", path.display()))?;
        if file_type.is_file() {
            records.push((row_id, path));
        }
    }
    Ok(records)
}

/// Remove `*.tmp` files directly inside `dir`.
async fn remove_temp_files_in(dir: &Path) -> Result<(usize, Vec<PathBuf>)> {
    let mut removed = 0;
    let mut subdirs = Vec::new();
    let Some(mut entries) = read_dir(dir).await? else {
        return Ok((0, subdirs));
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .io_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .io_context(|| format!("Failed to stat {}", path.display()))?;
        if file_type.is_dir() {
            subdirs.push(path);
        } else if is_temp_file(&path) && remove_if_exists(&path).await? {
            debug!(path = %path.display(), "removed leftover temp file");
            removed += 1;
        }
    }
    Ok((removed, subdirs))
}

impl Persister {
    /// Create a persister for `store`. Nothing touches the disk until
    /// [`load`](Self::load) or a save.
    pub fn new(store: &Store, config: PersisterConfig) -> Self {
        let collections = config
            .collections
            .into_iter()
            .map(|c| (c.name, c.indexed_fields))
            .collect();
        Self {
            inner: Arc::new(Inner {
                store: store.clone(),
                layout: DataLayout::new(config.data_path),
                collections,
                auto_save_interval: config.auto_save_interval,
                save_lock: tokio::sync::Mutex::new(SaveState::default()),
                auto_save: parking_lot::Mutex::new(None),
                watcher: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakPersister {
        WeakPersister(Arc::downgrade(&self.inner))
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn layout(&self) -> &DataLayout {
        &self.inner.layout
    }

    pub fn data_path(&self) -> &Path {
        self.inner.layout.root()
    }

    /// Names of the persisted collections.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.inner.collections.keys().map(String::as_str)
    }

    /// Indexed fields of a persisted collection.
    pub fn indexed_fields(&self, collection: &str) -> Option<&[String]> {
        self.inner.collections.get(collection).map(Vec::as_slice)
    }

    pub fn auto_save_interval(&self) -> Duration {
        self.inner.auto_save_interval
    }

    // ---- load ----

    /// Replace the store's content with what is on disk.
    ///
    /// A missing data directory is created and yields an empty store.
    /// Temp files and index files are never read. Any unparsable record
    /// fails the whole load and leaves the store untouched.
    pub async fn load(&self) -> Result<()> {
        let _guard = self.inner.save_lock.lock().await;
        let layout = &self.inner.layout;
        create_dir(layout.root()).await?;

        let mut tables = Tables::new();
        let mut rows = 0;
        for collection in self.inner.collections.keys() {
            let table = self.load_collection(collection).await?;
            rows += table.len();
            if !table.is_empty() {
                tables.insert(collection.clone(), table);
            }
        }
        let values = self.load_values().await?;

        debug!(
            data_path = %layout.root().display(),
            collections = tables.len(),
            rows,
            values = values.len(),
            "loaded data directory"
        );
        self.inner.store.set_content(tables, values);
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<Table> {
        let dir = self.inner.layout.collection_dir(collection);
        let mut table = Table::new();
        for (row_id, path) in list_records(&dir).await? {
            let bytes = tokio::fs::read(&path)
                .await
                .io_context(|| format!("Failed to read {}", path.display()))?;
            table.insert(row_id, decode_object(&path, &bytes)?);
        }
        Ok(table)
    }

    async fn load_values(&self) -> Result<Values> {
        let path = self.inner.layout.values_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => decode_object(&path, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Values::new()),
            Err(e) => Err(e).io_context(|| format!("Failed to read {}", path.display())),
        }
    }

    // ---- save ----

    /// Write the store to disk.
    ///
    /// With `None` every configured collection is written in full, stale
    /// record files are removed and every index file is rebuilt. With a
    /// change set only the listed rows are written or deleted, then the
    /// index files of the touched collections are rebuilt. Collections
    /// without configuration are skipped with a warning.
    ///
    /// The store's change feed is left alone; see
    /// [`save_changes`](Self::save_changes).
    pub async fn save(&self, changes: Option<ChangeSet>) -> Result<SaveStats> {
        let mut state = self.inner.save_lock.lock().await;
        match changes {
            None => {
                let stats = self.write_full().await?;
                state.saved_once = true;
                Ok(stats)
            }
            Some(changes) => self.write_incremental(&changes).await,
        }
    }

    /// Save whatever changed since the previous call.
    ///
    /// The first save of a persister is always full. If writing fails the
    /// consumed changes are handed back to the store so the next attempt
    /// retries them.
    pub async fn save_changes(&self) -> Result<SaveStats> {
        let mut state = self.inner.save_lock.lock().await;
        let store = &self.inner.store;
        let changes = store.take_changes();

        let result = if !state.saved_once {
            self.write_full().await
        } else if changes.is_empty() {
            return Ok(SaveStats::default());
        } else {
            self.write_incremental(&changes).await
        };

        match result {
            Ok(stats) => {
                state.saved_once = true;
                Ok(stats)
            }
            Err(e) => {
                store.restore_changes(changes);
                Err(e)
            }
        }
    }

    async fn write_full(&self) -> Result<SaveStats> {
        let tables = self.inner.store.tables();
        let mut stats = SaveStats {
            full: true,
            ..SaveStats::default()
        };

        for collection in tables.keys() {
            if !self.inner.collections.contains_key(collection) {
                warn!(%collection, "skipping collection without persistence config");
            }
        }

        for (collection, fields) in &self.inner.collections {
            let table = tables.get(collection);
            let dir = self.inner.layout.collection_dir(collection);
            if table.is_none() && !dir_exists(&dir).await? {
                continue;
            }
            create_dir(&dir).await?;

            for (row_id, row) in table.into_iter().flatten() {
                if self.write_record(collection, row_id, row).await? {
                    stats.rows_written += 1;
                }
            }
            for (row_id, path) in list_records(&dir).await? {
                if table.is_none_or(|t| !t.contains_key(&row_id))
                    && remove_if_exists(&path).await?
                {
                    stats.rows_deleted += 1;
                }
            }
            stats.index_files_written += self.write_indices(collection, fields, table).await?;
        }

        self.write_values(&self.inner.store.values()).await?;
        stats.values_written = true;

        debug!(?stats, data_path = %self.data_path().display(), "full save");
        Ok(stats)
    }

    async fn write_incremental(&self, changes: &ChangeSet) -> Result<SaveStats> {
        let store = &self.inner.store;
        let layout = &self.inner.layout;
        let mut stats = SaveStats::default();

        for (collection, rows) in changes.tables() {
            let Some(fields) = self.inner.collections.get(collection) else {
                warn!(collection, "skipping collection without persistence config");
                continue;
            };
            let dir = layout.collection_dir(collection);
            let mut dir_ready = dir_exists(&dir).await?;

            for (row_id, change) in rows {
                // A row recorded as written may have been deleted since;
                // the store is the source of truth.
                let current = if change.deleted {
                    None
                } else {
                    store.row(collection, row_id)
                };
                match current {
                    Some(row) => {
                        if !dir_ready {
                            create_dir(&dir).await?;
                            dir_ready = true;
                        }
                        if self.write_record(collection, row_id, &row).await? {
                            stats.rows_written += 1;
                        }
                    }
                    None => {
                        // Invalid IDs were never written.
                        if validate_row_id(row_id).is_ok()
                            && remove_if_exists(&layout.record_path(collection, row_id)).await?
                        {
                            stats.rows_deleted += 1;
                        }
                    }
                }
            }

            if dir_ready {
                let table = store.table(collection);
                stats.index_files_written +=
                    self.write_indices(collection, fields, Some(&table)).await?;
            }
        }

        if changes.values_changed() {
            self.write_values(&store.values()).await?;
            stats.values_written = true;
        }

        debug!(?stats, data_path = %self.data_path().display(), "incremental save");
        Ok(stats)
    }

    /// Returns `false` if the row ID cannot be a file name. Such rows
    /// stay in memory only.
    async fn write_record(&self, collection: &str, row_id: &str, row: &Row) -> Result<bool> {
        if let Err(e) = validate_row_id(row_id) {
            warn!(collection, %e, "skipping row that cannot be persisted");
            return Ok(false);
        }
        let path = self.inner.layout.record_path(collection, row_id);
        let bytes = encode_pretty(&path, row)?;
        write_atomic(&path, &bytes).await?;
        Ok(true)
    }

    async fn write_values(&self, values: &Values) -> Result<()> {
        let path = self.inner.layout.values_path();
        let bytes = encode_pretty(&path, values)?;
        write_atomic(&path, &bytes).await
    }

    /// Rewrite every index file of a collection. Returns the number of
    /// files written.
    async fn write_indices(
        &self,
        collection: &str,
        fields: &[String],
        table: Option<&Table>,
    ) -> Result<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        create_dir(&self.inner.layout.indices_dir(collection)).await?;
        for field in fields {
            let path = self.inner.layout.index_path(collection, field);
            let bytes = encode_index(&path, field, table)?;
            write_atomic(&path, &bytes).await?;
        }
        Ok(fields.len())
    }

    // ---- maintenance ----

    /// Rewrite every index file from the current store content without
    /// touching record files. Returns the number of files written.
    pub async fn rebuild_indices(&self) -> Result<usize> {
        let _guard = self.inner.save_lock.lock().await;
        let mut written = 0;
        for (collection, fields) in &self.inner.collections {
            let table = self.inner.store.table(collection);
            if table.is_empty() && !dir_exists(&self.inner.layout.collection_dir(collection)).await? {
                continue;
            }
            written += self.write_indices(collection, fields, Some(&table)).await?;
        }
        debug!(files = written, "rebuilt index files");
        Ok(written)
    }

    /// Parse an index file. A missing file has no entries.
    pub async fn read_index_file(&self, collection: &str, field: &str) -> Result<Vec<IndexEntry>> {
        let path = self.inner.layout.index_path(collection, field);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).io_context(|| format!("Failed to read {}", path.display()));
            }
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| Error::Json {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Remove temp files left behind by an interrupted save.
    ///
    /// Looks in the data root, each collection directory and each
    /// `indices` directory. Returns how many files were removed.
    pub async fn clean_temp_files(&self) -> Result<usize> {
        let _guard = self.inner.save_lock.lock().await;
        let (mut removed, collection_dirs) = remove_temp_files_in(self.data_path()).await?;
        for dir in collection_dirs {
            let (count, subdirs) = remove_temp_files_in(&dir).await?;
            removed += count;
            for subdir in subdirs {
                if subdir.file_name().is_some_and(|name| name == INDICES_DIR) {
                    removed += remove_temp_files_in(&subdir).await?.0;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "cleaned temp files");
        }
        Ok(removed)
    }

    // ---- auto-save ----

    /// Start saving changes periodically in the background.
    ///
    /// Must be called from within a tokio runtime. Calling it again while
    /// auto-save runs does nothing.
    pub fn start_auto_save(&self) -> Result<()> {
        let mut slot = self.inner.auto_save.lock();
        if slot.is_none() {
            *slot = Some(AutoSave::spawn(
                self.downgrade(),
                self.inner.auto_save_interval,
            )?);
        }
        Ok(())
    }

    /// Stop the background task. Once this returns no further auto-save
    /// runs; a save already in progress is waited for.
    pub async fn stop_auto_save(&self) -> Result<()> {
        let auto_save = self.inner.auto_save.lock().take();
        match auto_save {
            Some(auto_save) => auto_save.stop().await,
            None => Ok(()),
        }
    }

    pub fn is_auto_saving(&self) -> bool {
        self.inner.auto_save.lock().is_some()
    }

    // ---- external changes ----

    /// Invoke `callback` whenever files below the data directory change.
    ///
    /// Replaces a previously registered listener. Events caused by this
    /// persister's own saves are reported too.
    pub fn start_listening<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(ExternalChange) + Send + 'static,
    {
        let root = self.data_path();
        std::fs::create_dir_all(root)
            .io_context(|| format!("Failed to create directory {}", root.display()))?;
        let watcher = ExternalChangeWatcher::new(root, callback)?;
        *self.inner.watcher.lock() = Some(watcher);
        Ok(())
    }

    /// Stop watching. Returns `false` if no listener was registered.
    pub fn stop_listening(&self) -> bool {
        self.inner.watcher.lock().take().is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.watcher.lock().is_some()
    }
}
