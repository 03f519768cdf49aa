// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! File-per-record persistence for the Tabula record store.
//!
//! Every record lives in its own pretty-printed JSON file, every indexed
//! field gets a JSONL file listing `{"key", "rowId"}` pairs and global
//! values go to `_values.json`. All writes go through a temp file that is
//! synced and renamed into place, so a crash never leaves a half-written
//! committed file behind.
//!
//! **Architecture**: This is the Persistence Layer in Tabula's storage
//! architecture. It consumes the change feed of a
//! [`tabula_store_core::Store`] and is driven either explicitly or by a
//! background auto-save task.
//!
//! # Example
//!
//! ```ignore
//! use tabula_store_core::Store;
//! use tabula_store_disk::{Persister, PersisterConfig};
//!
//! let store = Store::new();
//! let config = PersisterConfig::new("./data").collection("users", ["email", "name"]);
//! let persister = Persister::new(&store, config);
//!
//! persister.load().await?;
//! persister.start_auto_save()?;
//! ```

mod atomic;
mod auto_save;
mod error;
pub mod layout;
mod persister;
mod watcher;

pub use atomic::{remove_if_exists, write_atomic};
pub use error::{Error, IoContext, Result};
pub use layout::DataLayout;
pub use persister::{
    CollectionConfig, DEFAULT_AUTO_SAVE_INTERVAL, IndexEntry, Persister, PersisterConfig,
    SaveStats,
};
pub use watcher::{ExternalChange, ExternalChangeWatcher};
