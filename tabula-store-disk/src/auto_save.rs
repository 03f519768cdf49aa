// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Periodic background saving.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::persister::WeakPersister;

/// Handle to a running auto-save task.
///
/// Dropping it cancels the task without waiting; [`AutoSave::stop`] also
/// waits for an in-flight save to finish.
pub(crate) struct AutoSave {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AutoSave {
    /// Spawn the task on the current tokio runtime.
    pub(crate) fn spawn(persister: WeakPersister, period: Duration) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let cancel = CancellationToken::new();
        let task = handle.spawn(run(persister, period, cancel.clone()));
        debug!(period_ms = period.as_millis() as u64, "auto-save started");
        Ok(Self {
            cancel,
            task: Some(task),
        })
    }

    /// Cancel the task and wait until it has exited.
    pub(crate) async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| Error::TaskJoin(e.to_string()))?;
        }
        debug!("auto-save stopped");
        Ok(())
    }
}

impl Drop for AutoSave {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(persister: WeakPersister, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; saves start one period in.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(persister) = persister.upgrade() else {
            break;
        };
        match persister.save_changes().await {
            Ok(stats) if stats.is_empty() => {}
            Ok(stats) => debug!(?stats, "auto-save"),
            Err(e) => warn!(error = %e, "auto-save failed, will retry"),
        }
    }
}
