// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Paths inside a data directory.
//!
//! ```text
//! <root>/
//!   <collection>/
//!     <rowId>.json
//!     indices/<field>.jsonl
//!   _values.json
//!   .lock
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Per-collection subdirectory holding index files.
pub const INDICES_DIR: &str = "indices";
/// File holding the global values.
pub const VALUES_FILE: &str = "_values.json";
/// Advisory lock file at the data root.
pub const LOCK_FILE: &str = ".lock";
/// Suffix of files that have not been committed yet.
pub const TEMP_SUFFIX: &str = ".tmp";

const RECORD_EXTENSION: &str = "json";
const INDEX_EXTENSION: &str = "jsonl";

/// Resolves the on-disk location of every persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    pub fn indices_dir(&self, collection: &str) -> PathBuf {
        self.collection_dir(collection).join(INDICES_DIR)
    }

    pub fn record_path(&self, collection: &str, row_id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{row_id}.{RECORD_EXTENSION}"))
    }

    pub fn index_path(&self, collection: &str, field: &str) -> PathBuf {
        self.indices_dir(collection)
            .join(format!("{field}.{INDEX_EXTENSION}"))
    }

    pub fn values_path(&self) -> PathBuf {
        self.root.join(VALUES_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

/// The uncommitted sibling of `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Whether `path` names an uncommitted temp file.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
}

/// Row ID of a committed record file, `None` for anything else.
pub fn row_id_from_path(path: &Path) -> Option<&str> {
    if path.extension() != Some(OsStr::new(RECORD_EXTENSION)) {
        return None;
    }
    path.file_stem()
        .and_then(OsStr::to_str)
        .filter(|stem| !stem.is_empty())
}

/// Reject row IDs that would escape the collection directory or could not
/// be read back under the same name.
pub fn validate_row_id(row_id: &str) -> Result<()> {
    let valid = !row_id.is_empty()
        && row_id != "."
        && row_id != ".."
        && !row_id.contains(['/', '\\', '\0'])
        && !row_id.ends_with(TEMP_SUFFIX);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRowId(row_id.to_owned()))
    }
}
