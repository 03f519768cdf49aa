// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! In-memory relational record store for Tabula.
//!
//! This crate holds the data model every other Tabula crate builds on:
//!
//! - [`Store`]: collections of rows keyed by row ID, plus global values,
//!   with a change feed consumed by the persistence layer
//! - [`Indexes`]: derived field-value → row ID lookups, kept in sync with
//!   every store write
//! - [`Relationships`]: foreign-key navigation built on top of an index
//!
//! **Architecture**: This is the Record Layer in Tabula's storage
//! architecture. It performs no I/O; durability lives in
//! `tabula-store-disk`.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tabula_store_core::{Indexes, Store};
//!
//! let store = Store::new();
//! let indexes = Indexes::new(&store);
//! indexes.set_index_definition("usersByEmail", "users", "email");
//!
//! let row = json!({"email": "a@x.com", "name": "Alice"});
//! store.set_row("users", "u1", row.as_object().cloned().unwrap_or_default());
//!
//! assert_eq!(indexes.slice_row_ids("usersByEmail", "a@x.com"), vec!["u1"]);
//! ```

mod changes;
mod indexes;
mod relationships;
mod store;
mod types;

pub use changes::{ChangeSet, RowChange};
pub use indexes::{IndexDefinition, Indexes};
pub use relationships::{RelationshipDefinition, Relationships};
pub use store::{Store, StoreObserver};
pub use types::*;
