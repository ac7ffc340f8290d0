//! Deferred background sync.
//!
//! [`BackgroundSync`] wraps an optional platform registrar and never fails:
//! without one, queued writes simply drain on the next reconnect.
//! [`DeferredSyncWorker`] is the in-process registrar, a tokio task that waits
//! for connectivity and drains the queue for every outstanding tag.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::sync::network::NetworkStatus;
use crate::sync::queue::{ConflictPolicy, OfflineQueue};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const SYNC_TAG: &str = "canvas-sync-queue";

/// Delay before retrying a drain that failed while online.
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

#[async_trait]
pub trait SyncRegistrar: Send + Sync {
    async fn register(&self, tag: &str) -> SyncResult<()>;

    async fn pending_tags(&self) -> SyncResult<Vec<String>>;
}

pub struct BackgroundSync {
    registrar: Option<Arc<dyn SyncRegistrar>>,
}

impl BackgroundSync {
    pub fn new(registrar: Option<Arc<dyn SyncRegistrar>>) -> Self {
        Self { registrar }
    }

    pub fn is_supported(&self) -> bool {
        self.registrar.is_some()
    }

    /// Request a deferred drain. Returns false when unsupported or when the
    /// registrar rejects the request.
    pub async fn register_sync(&self) -> bool {
        let Some(registrar) = &self.registrar else {
            return false;
        };
        match registrar.register(SYNC_TAG).await {
            Ok(()) => {
                debug!("registered background sync '{}'", SYNC_TAG);
                true
            }
            Err(e) => {
                warn!("background sync registration failed: {}", e);
                false
            }
        }
    }

    pub async fn has_pending_sync(&self) -> bool {
        let Some(registrar) = &self.registrar else {
            return false;
        };
        match registrar.pending_tags().await {
            Ok(tags) => tags.iter().any(|tag| tag == SYNC_TAG),
            Err(e) => {
                warn!("failed to read background sync tags: {}", e);
                false
            }
        }
    }
}

#[derive(Default)]
pub struct DeferredSyncWorker {
    tags: Mutex<BTreeSet<String>>,
    wake: Notify,
}

impl DeferredSyncWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn tags(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.tags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the worker until the network status channel closes.
    pub fn spawn(
        self: &Arc<Self>,
        mut status: watch::Receiver<NetworkStatus>,
        queue: Arc<OfflineQueue>,
        remote: Arc<dyn RemoteStore>,
        user_id: String,
        policy: ConflictPolicy,
    ) -> JoinHandle<()> {
        let worker = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                if worker.tags().is_empty() {
                    worker.wake.notified().await;
                    continue;
                }

                let online = status.borrow_and_update().is_online;
                if !online {
                    if status.changed().await.is_err() {
                        break;
                    }
                    continue;
                }

                let report = queue.drain_queue(remote.as_ref(), &user_id, policy).await;
                if queue.pending_count() == 0 {
                    let cleared = std::mem::take(&mut *worker.tags());
                    info!("background sync complete, cleared {} tags", cleared.len());
                    continue;
                }

                if report.skipped || !report.failed.is_empty() {
                    debug!("background sync will retry in {:?}", RETRY_DELAY);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        })
    }
}

#[async_trait]
impl SyncRegistrar for DeferredSyncWorker {
    async fn register(&self, tag: &str) -> SyncResult<()> {
        if tag.is_empty() {
            return Err(SyncError::BackgroundUnavailable(
                "empty sync tag".to_string(),
            ));
        }
        self.tags().insert(tag.to_string());
        self.wake.notify_one();
        Ok(())
    }

    async fn pending_tags(&self) -> SyncResult<Vec<String>> {
        Ok(self.tags().iter().cloned().collect())
    }
}
