// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Exclusive ownership of a data directory.
//!
//! An open [`Database`](crate::Database) holds a non-blocking exclusive
//! `flock()` on `<dataPath>/.lock`. A second open of the same directory,
//! from this process or another, fails instead of racing the first one's
//! saves.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Held for as long as a database is open. The lock is released on drop.
pub struct DataDirLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<std::fs::File>,
    path: PathBuf,
}

impl std::fmt::Debug for DataDirLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataDirLock").field("path", &self.path).finish()
    }
}

impl DataDirLock {
    /// Take the lock file at `path` without blocking.
    ///
    /// Fails with [`Error::Locked`](crate::Error::Locked) if it is held.
    #[cfg(unix)]
    pub fn acquire(path: &Path) -> Result<Self> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};
        use std::fs::OpenOptions;

        use tabula_store_disk::IoContext;

        use crate::error::Error;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .io_context(|| format!("Failed to open lock file {}", path.display()))?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            if errno == Errno::EWOULDBLOCK {
                Error::Locked(path.parent().unwrap_or(path).to_owned())
            } else {
                Error::io(
                    format!("Failed to lock {}", path.display()),
                    std::io::Error::from(errno),
                )
            }
        })?;

        Ok(Self {
            _flock: flock,
            path: path.to_owned(),
        })
    }

    /// Without `flock()` only the lock file is created.
    #[cfg(not(unix))]
    pub fn acquire(path: &Path) -> Result<Self> {
        use tabula_store_disk::IoContext;

        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .io_context(|| format!("Failed to open lock file {}", path.display()))?;
        Ok(Self {
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
