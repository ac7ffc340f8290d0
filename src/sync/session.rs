//! One open workspace wired to the sync engine.
//!
//! Edits go to the [`GraphStore`] synchronously. Saves are debounced, written
//! through the snapshot cache, then sent to the remote store when online or
//! queued for a background drain when not.

use crate::cache::SnapshotCache;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::sync::background::BackgroundSync;
use crate::sync::conflict::check_for_conflict;
use crate::sync::network::NetworkMonitor;
use crate::sync::queue::{ConflictPolicy, OfflineQueue};
use canvas_graph::{GraphStore, WorkspaceMetadata, WorkspaceSnapshot};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub user_id: String,
    pub debounce: Duration,
    pub fetch_timeout: Duration,
    pub conflict_policy: ConflictPolicy,
}

impl SessionSettings {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            debounce: DEFAULT_DEBOUNCE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

/// Shared engine handles. One per process, passed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub cache: Arc<SnapshotCache>,
    pub queue: Arc<OfflineQueue>,
    pub remote: Arc<dyn RemoteStore>,
    pub monitor: Arc<NetworkMonitor>,
    pub background: Arc<BackgroundSync>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    /// Written to the offline queue.
    Queued,
    /// The remote changed since this session last synchronized; nothing was
    /// overwritten.
    Conflict {
        local_timestamp: DateTime<Utc>,
        server_timestamp: DateTime<Utc>,
    },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateSource {
    Empty,
    Cache,
    Remote,
}

pub struct WorkspaceSession {
    workspace_id: String,
    ctx: SessionContext,
    store: Mutex<GraphStore>,
    status: watch::Sender<SaveStatus>,
    /// Bumped on every edit and flush; a debounced save only fires if its
    /// generation is still current.
    save_generation: AtomicU64,
    debounce_armed: AtomicBool,
    /// Remote `updated_at` this session's state is based on: the last
    /// remote copy it loaded, or the stamp of its own last save or queued
    /// write, whichever happened last.
    synced_at: Mutex<Option<DateTime<Utc>>>,
    source: Mutex<HydrateSource>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WorkspaceSession {
    /// Open `workspace_id`: cached snapshot first, then the remote copy if
    /// it arrives within the fetch timeout.
    pub async fn hydrate(workspace_id: &str, ctx: SessionContext) -> Arc<Self> {
        let (status, _) = watch::channel(SaveStatus::Idle);
        let session = Arc::new(Self {
            workspace_id: workspace_id.to_string(),
            store: Mutex::new(GraphStore::new(workspace_id)),
            ctx,
            status,
            save_generation: AtomicU64::new(0),
            debounce_armed: AtomicBool::new(false),
            synced_at: Mutex::new(None),
            source: Mutex::new(HydrateSource::Empty),
        });

        if let Some(snapshot) = session.ctx.cache.get(workspace_id) {
            debug!(
                "hydrated {} from cache ({} nodes)",
                workspace_id,
                snapshot.nodes.len()
            );
            session.store().load_snapshot(snapshot);
            *lock(&session.source) = HydrateSource::Cache;
        }

        session.refresh().await;
        session
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn hydrated_from(&self) -> HydrateSource {
        *lock(&self.source)
    }

    /// Direct access to the graph. Mutations made here are not saved until
    /// the next [`edit`](Self::edit) or [`flush`](Self::flush).
    pub fn store(&self) -> MutexGuard<'_, GraphStore> {
        lock(&self.store)
    }

    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    pub fn has_pending_save(&self) -> bool {
        self.debounce_armed.load(Ordering::SeqCst)
    }

    fn publish(&self, status: SaveStatus) {
        self.status.send_replace(status);
    }

    async fn fetch_remote(&self) -> SyncResult<(WorkspaceSnapshot, Option<DateTime<Utc>>)> {
        let remote = self.ctx.remote.as_ref();
        let user_id = self.ctx.settings.user_id.as_str();
        let workspace_id = self.workspace_id.as_str();

        let fetch = async {
            let updated_at = remote.workspace_updated_at(user_id, workspace_id).await?;
            let nodes = remote.load_nodes(user_id, workspace_id).await?;
            let edges = remote.load_edges(user_id, workspace_id).await?;
            Ok::<_, SyncError>((WorkspaceSnapshot::new(nodes, edges), updated_at))
        };

        let timeout = self.ctx.settings.fetch_timeout;
        tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| SyncError::FetchTimeout(timeout))?
    }

    /// Replace local state with the remote copy. Keeps the current state when
    /// offline, on failure or timeout, when the remote workspace does not
    /// exist, or when the graph was edited while the fetch was in flight.
    pub async fn refresh(&self) -> bool {
        if !self.ctx.monitor.is_online() {
            debug!("offline, keeping local state for {}", self.workspace_id);
            return false;
        }

        let revision = self.store().revision();
        let (snapshot, updated_at) = match self.fetch_remote().await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("remote fetch for {} failed, keeping local state: {}", self.workspace_id, e);
                return false;
            }
        };

        if updated_at.is_none() && snapshot.nodes.is_empty() && snapshot.edges.is_empty() {
            debug!("{} does not exist remotely yet", self.workspace_id);
            return false;
        }

        {
            let mut store = self.store();
            if store.revision() != revision {
                info!("{} edited during fetch, keeping local state", self.workspace_id);
                return false;
            }
            store.load_snapshot(snapshot.clone());
        }

        *lock(&self.synced_at) = updated_at;
        *lock(&self.source) = HydrateSource::Remote;
        self.ctx.cache.set(&self.workspace_id, &snapshot);
        info!(
            "hydrated {} from remote ({} nodes, {} edges)",
            self.workspace_id,
            snapshot.nodes.len(),
            snapshot.edges.len()
        );
        true
    }

    /// Apply `mutate` to the graph and schedule a debounced save. A new edit
    /// restarts the debounce window.
    pub fn edit<R>(self: &Arc<Self>, mutate: impl FnOnce(&mut GraphStore) -> R) -> R {
        let result = mutate(&mut self.store());
        self.schedule_save();
        result
    }

    fn schedule_save(self: &Arc<Self>) {
        let generation = self.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.debounce_armed.store(true, Ordering::SeqCst);
        let weak: Weak<Self> = Arc::downgrade(self);
        let debounce = self.ctx.settings.debounce;

        // Superseded timers wake up and exit; an in-flight save is never
        // interrupted.
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            if session.save_generation.load(Ordering::SeqCst) == generation {
                session.debounce_armed.store(false, Ordering::SeqCst);
                session.save_now().await;
            }
        });
    }

    fn cancel_pending_save(&self) {
        self.save_generation.fetch_add(1, Ordering::SeqCst);
        self.debounce_armed.store(false, Ordering::SeqCst);
    }

    /// Save immediately, cancelling any pending debounce.
    pub async fn flush(&self) -> SaveStatus {
        self.cancel_pending_save();
        self.save_now().await
    }

    /// Cancel the debounce and write the final state so nothing is lost when
    /// the workspace closes.
    pub async fn teardown(&self) -> SaveStatus {
        let status = self.flush().await;
        debug!("closed {} ({:?})", self.workspace_id, status);
        status
    }

    async fn save_now(&self) -> SaveStatus {
        let snapshot = self.store().snapshot();
        let captured_at = snapshot.loaded_at;

        self.ctx.cache.set(&self.workspace_id, &snapshot);
        self.touch_listing(captured_at);

        let status = if self.ctx.monitor.is_online() {
            self.publish(SaveStatus::Saving);
            self.save_remote(snapshot, captured_at).await
        } else {
            self.enqueue(snapshot, captured_at).await
        };

        self.publish(status.clone());
        status
    }

    async fn save_remote(&self, snapshot: WorkspaceSnapshot, captured_at: DateTime<Utc>) -> SaveStatus {
        let remote = self.ctx.remote.as_ref();
        let user_id = self.ctx.settings.user_id.as_str();

        let server_updated_at = match remote.workspace_updated_at(user_id, &self.workspace_id).await {
            Ok(updated_at) => updated_at,
            Err(e) => {
                warn!("remote unreachable for {}, queueing: {}", self.workspace_id, e);
                return self.enqueue(snapshot, captured_at).await;
            }
        };

        if let Some(server) = server_updated_at {
            let base = (*lock(&self.synced_at)).unwrap_or(captured_at);
            let check = check_for_conflict(base, server);
            if check.has_conflict {
                match self.ctx.settings.conflict_policy {
                    ConflictPolicy::LastWriterWins => {
                        warn!(
                            "{} changed remotely at {} (local base {}), not overwriting",
                            self.workspace_id, server, base
                        );
                        return SaveStatus::Conflict {
                            local_timestamp: check.local_timestamp,
                            server_timestamp: check.server_timestamp,
                        };
                    }
                    ConflictPolicy::PreferLocal => {
                        warn!("{} changed remotely at {}, overwriting", self.workspace_id, server);
                    }
                }
            }
        }

        match remote
            .save_workspace(
                user_id,
                &self.workspace_id,
                &snapshot.nodes,
                &snapshot.edges,
                captured_at,
            )
            .await
        {
            Ok(()) => {
                *lock(&self.synced_at) = Some(captured_at);
                debug!("saved {} to remote", self.workspace_id);
                SaveStatus::Saved
            }
            Err(e) => {
                warn!("remote save for {} failed, queueing: {}", self.workspace_id, e);
                self.enqueue(snapshot, captured_at).await
            }
        }
    }

    async fn enqueue(&self, snapshot: WorkspaceSnapshot, captured_at: DateTime<Utc>) -> SaveStatus {
        let durable = self.ctx.queue.queue_save_at(
            &self.workspace_id,
            snapshot.nodes,
            snapshot.edges,
            captured_at,
        );
        // A drain stamps the remote with `captured_at`; our own write must
        // not read as a remote change on the next save.
        *lock(&self.synced_at) = Some(captured_at);

        if !self.ctx.background.register_sync().await {
            debug!("no background sync, {} drains on reconnect", self.workspace_id);
        }

        if durable {
            SaveStatus::Queued
        } else {
            SaveStatus::Error("write queued in memory only: local storage unavailable".to_string())
        }
    }

    fn touch_listing(&self, updated_at: DateTime<Utc>) {
        let name = self
            .ctx
            .cache
            .get_metadata()
            .into_iter()
            .find(|m| m.id == self.workspace_id)
            .map(|m| m.name)
            .unwrap_or_else(|| self.workspace_id.clone());

        self.ctx.cache.upsert_metadata(WorkspaceMetadata {
            id: self.workspace_id.clone(),
            name,
            updated_at,
        });
    }
}

impl Drop for WorkspaceSession {
    fn drop(&mut self) {
        if self.debounce_armed.load(Ordering::SeqCst) {
            warn!("{} dropped with an unsaved edit; call teardown()", self.workspace_id);
        }
    }
}
