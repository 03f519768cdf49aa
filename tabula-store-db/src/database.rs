// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The database handle and its caller-owned slot.

use std::path::Path;
use std::sync::Arc;

use tabula_store_core::{Indexes, Relationships, Store};
use tabula_store_disk::{DataLayout, IoContext, Persister, PersisterConfig, SaveStats};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::lock::DataDirLock;
use crate::records::Records;
use crate::schema;

/// An open data directory with the Tabula schema registered.
///
/// Only one `Database` can be open per data directory at a time. The
/// directory is released by [`shutdown`](Self::shutdown) or when the
/// handle is dropped.
pub struct Database {
    config: Config,
    store: Store,
    indexes: Indexes,
    relationships: Relationships,
    persister: Persister,
    /// `None` once shut down
    lock: parking_lot::Mutex<Option<DataDirLock>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_path", &self.config.data_path)
            .field("store", &self.store)
            .field("lock", &self.lock)
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) the data directory named by `config`.
    ///
    /// Takes the directory lock, registers the schema, loads every
    /// persisted record, removes temp files left by an interrupted save
    /// and starts auto-save and the external change watcher as
    /// configured. Any failure aborts the open.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let data_path = config.data_path.clone();
        tokio::fs::create_dir_all(&data_path)
            .await
            .io_context(|| format!("Failed to create data directory {}", data_path.display()))?;
        let lock = DataDirLock::acquire(&DataLayout::new(&data_path).lock_path())?;

        let store = Store::new();
        let indexes = Indexes::new(&store);
        let relationships = Relationships::new(&store, &indexes);
        schema::register_indexes(&indexes);
        schema::register_relationships(&relationships);

        let mut persister_config =
            PersisterConfig::new(&data_path).auto_save_interval(config.auto_save_interval());
        persister_config.collections = schema::collection_configs();
        let persister = Persister::new(&store, persister_config);

        persister.load().await?;
        let removed = persister.clean_temp_files().await?;
        if removed > 0 {
            warn!(removed, "removed temp files left by an interrupted save");
        }

        if config.auto_save {
            persister.start_auto_save()?;
        }
        if config.watch_external_changes {
            persister.start_listening(|change| {
                debug!(kind = ?change.kind, paths = ?change.paths, "external change");
            })?;
        }

        info!(
            data_path = %data_path.display(),
            collections = store.table_names().len(),
            auto_save = config.auto_save,
            "database opened"
        );

        Ok(Self {
            config,
            store,
            indexes,
            relationships,
            persister,
            lock: parking_lot::Mutex::new(Some(lock)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_path(&self) -> &Path {
        &self.config.data_path
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    /// Typed record access with IDs and timestamps.
    pub fn records(&self) -> Records<'_> {
        Records::new(self)
    }

    /// Whether this handle still owns the data directory.
    pub fn is_open(&self) -> bool {
        self.lock.lock().is_some()
    }

    /// Save pending changes now.
    pub async fn save(&self) -> Result<SaveStats> {
        Ok(self.persister.save_changes().await?)
    }

    /// Stop background work and save pending changes.
    ///
    /// The handle stays usable but nothing is saved automatically any
    /// more. The directory lock is held until the handle is dropped.
    pub async fn close(&self) -> Result<SaveStats> {
        self.persister.stop_listening();
        self.persister.stop_auto_save().await?;
        let stats = self.save().await?;
        info!(data_path = %self.data_path().display(), "database closed");
        Ok(stats)
    }

    /// Stop background work and release the data directory without
    /// saving.
    ///
    /// Clones of the handle keep the in-memory store but no longer own
    /// the directory, so a new [`Database`] can open it. Calling this
    /// twice does nothing.
    pub async fn shutdown(&self) -> Result<()> {
        self.persister.stop_listening();
        self.persister.stop_auto_save().await?;
        if self.lock.lock().take().is_some() {
            debug!(data_path = %self.data_path().display(), "released data directory");
        }
        Ok(())
    }
}

/// Caller-owned cell holding at most one open [`Database`].
///
/// The first [`get_db`](Self::get_db) opens the database; later calls
/// return the same handle until [`reset_db`](Self::reset_db).
#[derive(Debug, Default)]
pub struct DbSlot {
    config: Config,
    current: tokio::sync::Mutex<Option<Arc<Database>>>,
}

impl DbSlot {
    /// A slot opening databases with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// The open database, opening it first if needed.
    ///
    /// `data_path` overrides the configured directory but only matters for
    /// the call that actually opens; an already open database is returned
    /// as is.
    pub async fn get_db(&self, data_path: Option<&Path>) -> Result<Arc<Database>> {
        let mut current = self.current.lock().await;
        if let Some(db) = current.as_ref() {
            return Ok(db.clone());
        }

        let mut config = self.config.clone();
        if let Some(data_path) = data_path {
            config.data_path = data_path.to_owned();
        }
        let db = Arc::new(Database::open(config).await?);
        *current = Some(db.clone());
        Ok(db)
    }

    /// Shut the open database down and forget it.
    ///
    /// Pending changes are not saved. The directory is released even if
    /// other clones of the handle are still alive.
    pub async fn reset_db(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(db) = current.take() {
            db.shutdown().await?;
            debug!(data_path = %db.data_path().display(), "database reset");
        }
        Ok(())
    }

    /// The open database, if any.
    pub async fn current(&self) -> Option<Arc<Database>> {
        self.current.lock().await.clone()
    }
}
