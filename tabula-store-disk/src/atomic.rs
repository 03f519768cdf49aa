// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Crash-safe file replacement.
//!
//! Readers only ever observe the previous committed file or the new one:
//! contents go to `<path>.tmp`, are synced, then renamed over `<path>`.

use std::io::ErrorKind;
use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::error::{IoContext, Result};
use crate::layout::temp_path;

/// Atomically replace `path` with `contents`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let result = write_then_rename(&tmp, path, contents).await;
    if result.is_err() {
        // Leave no partial temp file behind.
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

async fn write_then_rename(tmp: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .io_context(|| format!("Failed to create {}", tmp.display()))?;
    file.write_all(contents)
        .await
        .io_context(|| format!("Failed to write {}", tmp.display()))?;
    file.flush()
        .await
        .io_context(|| format!("Failed to flush {}", tmp.display()))?;
    file.sync_all()
        .await
        .io_context(|| format!("Failed to sync {}", tmp.display()))?;
    drop(file);

    tokio::fs::rename(tmp, path).await.io_context(|| {
        format!(
            "Failed to move {} to {}",
            tmp.display(),
            path.display()
        )
    })
}

/// Remove a file, treating an already missing file as success.
///
/// Returns whether a file was actually removed.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).io_context(|| format!("Failed to remove {}", path.display())),
    }
}
