// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Error types for on-disk persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or saving a data directory.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem error with context
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be parsed as JSON
    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be serialized
    #[error("Failed to encode '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record file holds valid JSON that is not an object
    #[error("Record file '{path}' does not contain a JSON object")]
    InvalidRecord { path: PathBuf },

    /// A row ID that cannot be used as a file name
    #[error("Row ID {0:?} cannot be stored as a file name")]
    InvalidRowId(String),

    /// Filesystem watcher error
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Auto-save needs a running tokio runtime
    #[error("Auto-save requires a running tokio runtime")]
    NoRuntime,

    /// The background save task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskJoin(String),
}

impl Error {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Whether this is an IO error of the given kind.
    pub fn is_io_kind(&self, kind: std::io::ErrorKind) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == kind)
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
