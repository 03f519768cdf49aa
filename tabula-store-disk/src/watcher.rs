// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Best-effort notification about changes made to a data directory by
//! someone else.

use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::Result;
use crate::layout::{LOCK_FILE, is_temp_file};

/// A filesystem event below the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChange {
    pub kind: EventKind,
    /// Committed paths touched by the event; never empty
    pub paths: Vec<PathBuf>,
}

fn is_interesting(path: &Path) -> bool {
    !is_temp_file(path) && path.file_name().is_none_or(|name| name != LOCK_FILE)
}

/// Recursive watcher over a data directory. Watching stops on drop.
pub struct ExternalChangeWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl std::fmt::Debug for ExternalChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalChangeWatcher")
            .field("root", &self.root)
            .finish()
    }
}

impl ExternalChangeWatcher {
    /// Start watching `root`, which must exist.
    ///
    /// `callback` runs on the watcher's own thread. Temp files, the lock
    /// file and pure access events are filtered out.
    pub fn new<F>(root: &Path, callback: F) -> Result<Self>
    where
        F: Fn(ExternalChange) + Send + 'static,
    {
        let mut watcher = notify::recommended_watcher(
            move |event: notify::Result<notify::Event>| match event {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    let paths: Vec<PathBuf> =
                        event.paths.into_iter().filter(|p| is_interesting(p)).collect();
                    if !paths.is_empty() {
                        callback(ExternalChange {
                            kind: event.kind,
                            paths,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "watching for external changes");

        Ok(Self {
            _watcher: watcher,
            root: root.to_owned(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter() {
        assert!(is_interesting(Path::new("/data/users/u1.json")));
        assert!(!is_interesting(Path::new("/data/users/u1.json.tmp")));
        assert!(!is_interesting(Path::new("/data/.lock")));
    }
}
