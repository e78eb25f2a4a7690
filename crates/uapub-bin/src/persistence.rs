// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Write-back of the published configuration to the node configuration file.
//!
//! ```text
//! SessionRegistry ──request_write_back(v)──▶ WriteBackSignal
//!                                                  │ notify
//!                                                  ▼
//!                                         PersistenceWorker
//!                                    published_configuration()
//!                                                  │
//!                                                  ▼
//!                                   NodeConfigFile::save (tmp + rename)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uapub_config::NodeConfigFile;
use uapub_opcua::{PersistenceHook, SessionRegistry};

use crate::error::{BinError, BinResult};

// =============================================================================
// WriteBackSignal
// =============================================================================

/// Persistence hook handed to the publisher context.
///
/// Remembers the highest requested version and wakes the worker.
#[derive(Debug, Default)]
pub struct WriteBackSignal {
    requested: AtomicU64,
    notify: Notify,
}

impl WriteBackSignal {
    /// Creates a signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest version requested so far.
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl PersistenceHook for WriteBackSignal {
    fn request_write_back(&self, version: u64) {
        self.requested.fetch_max(version, Ordering::AcqRel);
        self.notify.notify_one();
    }
}

// =============================================================================
// PersistenceWorker
// =============================================================================

/// Writes the registry's desired state to disk on request.
pub struct PersistenceWorker {
    registry: Arc<SessionRegistry>,
    signal: Arc<WriteBackSignal>,
    path: PathBuf,
    written: u64,
}

impl PersistenceWorker {
    /// Creates a worker.
    ///
    /// Versions up to `written` are considered already on disk.
    pub fn new(
        registry: Arc<SessionRegistry>,
        signal: Arc<WriteBackSignal>,
        path: impl AsRef<Path>,
        written: u64,
    ) -> Self {
        Self {
            registry,
            signal,
            path: path.as_ref().to_path_buf(),
            written,
        }
    }

    /// Spawns the worker on the current runtime.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Runs until cancelled, then writes any outstanding version once more.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(path = %self.path.display(), "Persistence worker started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.signal.notified() => self.write_pending().await,
            }
        }
        self.write_pending().await;
        debug!(path = %self.path.display(), "Persistence worker stopped");
    }

    /// Writes the current configuration if a newer version was requested.
    pub async fn write_pending(&mut self) {
        let version = self.signal.requested();
        if version <= self.written {
            return;
        }
        match self.write().await {
            Ok(points) => {
                self.written = version;
                info!(
                    path = %self.path.display(),
                    version,
                    points,
                    "Published configuration saved"
                );
            }
            Err(e) => {
                warn!(path = %self.path.display(), version, error = %e, "Failed to save published configuration");
            }
        }
    }

    async fn write(&self) -> BinResult<usize> {
        let published = self.registry.published_configuration().await;
        let file = NodeConfigFile::from_published(&published);
        let points = file.point_count();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || file.save(&path))
            .await
            .map_err(|e| BinError::runtime(format!("persistence task failed: {e}")))??;
        Ok(points)
    }
}
