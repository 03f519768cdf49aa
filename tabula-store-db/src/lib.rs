// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The Tabula database: one record store with the fixed schema's indexes
//! and relationships, mirrored to a data directory.
//!
//! **Architecture**: This is the Database Layer in Tabula's storage
//! architecture. It wires `tabula-store-core` and `tabula-store-disk`
//! together and owns the data directory for as long as a [`Database`] is
//! open.
//!
//! # Key Features
//!
//! - Ten collections with `<collection>By<Field>` indexes and twelve
//!   relationships registered on open
//! - Exclusive per-directory lock instead of a process-wide singleton
//! - [`DbSlot`] for callers that want one shared handle
//! - [`Records`] for ID generation, timestamps and field validation
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use tabula_store_db::{Config, Database};
//!
//! let db = Database::open(Config::new("./data")).await?;
//! let user = db.records().create("users", json!({"email": "a@x.com"}).as_object().cloned().unwrap())?;
//! let found = db.records().find_by_index("usersByEmail", "a@x.com");
//! db.close().await?;
//! ```

pub mod config;
mod database;
mod error;
pub mod id;
mod lock;
mod records;
pub mod schema;
pub mod timestamp;

pub use config::Config;
pub use database::{Database, DbSlot};
pub use error::{Error, Result};
pub use tabula_store_disk::IoContext;
pub use lock::DataDirLock;
pub use records::{ID, RecordTimestamps, Records};
