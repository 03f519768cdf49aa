// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Error types for the database facade.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or using a database.
#[derive(Error, Debug)]
pub enum Error {
    /// Loading or saving the data directory failed, or another
    /// filesystem error
    #[error("Persistence error: {0}")]
    Disk(#[from] tabula_store_disk::Error),

    /// Another handle holds the data directory
    #[error("Data directory '{0}' is already open")]
    Locked(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A field does not have the type its collection declares
    #[error("Invalid value for {collection}.{field}: expected {expected}")]
    Validation {
        collection: String,
        field: String,
        expected: &'static str,
    },

    /// `create` was given the ID of an existing record
    #[error("Record {collection}/{id} already exists")]
    Exists { collection: String, id: String },

    /// A stored timestamp could not be parsed
    #[error("Invalid timestamp in field '{field}': {reason}")]
    Timestamp { field: String, reason: String },

    /// The random source for row IDs failed
    #[error("Failed to generate row ID: {0}")]
    RowId(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap a filesystem error outside the persister.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Disk(tabula_store_disk::Error::io(message, source))
    }

    /// Whether this is an IO error of the given kind.
    pub fn is_io_kind(&self, kind: std::io::ErrorKind) -> bool {
        matches!(self, Self::Disk(e) if e.is_io_kind(kind))
    }
}
