//! Durable queue of workspace writes captured while offline.
//!
//! Entries coalesce per workspace: a second save before the drain replaces the
//! payload but keeps the entry's place in line, so FIFO order across distinct
//! workspaces is preserved and at most one write per workspace is ever in
//! flight. The queue is mirrored to [`KeyValueStorage`] after every change.

use crate::remote::RemoteStore;
use crate::storage::KeyValueStorage;
use crate::sync::conflict::check_for_conflict;
use canvas_graph::{Edge, Node};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const QUEUE_KEY: &str = "canvas-sync:write-queue";

/// What to do with a queued write when the remote copy is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Remote wins; the queued write is dropped and reported.
    #[default]
    LastWriterWins,
    /// Commit the queued write anyway; the conflict is still reported.
    PreferLocal,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriterWins => "last_writer_wins",
            ConflictPolicy::PreferLocal => "prefer_local",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last_writer_wins" | "lww" => Ok(ConflictPolicy::LastWriterWins),
            "prefer_local" | "local" => Ok(ConflictPolicy::PreferLocal),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Queued,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedWrite {
    pub workspace_id: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Capture time of the latest payload.
    pub enqueued_at: DateTime<Utc>,
    pub generation: u64,
    #[serde(default)]
    pub attempts: u32,
    pub state: EntryState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport {
    pub workspace_id: String,
    pub local_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
    /// Whether the local payload was written despite the conflict.
    pub committed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub committed: Vec<String>,
    pub conflicts: Vec<ConflictReport>,
    pub failed: Vec<String>,
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.skipped && self.conflicts.is_empty() && self.failed.is_empty()
    }
}

/// Resets the drain flag even if the drain future is dropped mid-flight.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Snapshot of an entry taken when it moves to `Draining`.
struct InFlight {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    enqueued_at: DateTime<Utc>,
    generation: u64,
}

pub struct OfflineQueue {
    storage: Option<Arc<dyn KeyValueStorage>>,
    entries: Mutex<Vec<QueuedWrite>>,
    draining: AtomicBool,
    next_generation: AtomicU64,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineQueue {
    /// Queue without durable backing.
    pub fn new() -> Self {
        Self {
            storage: None,
            entries: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Reload the queue persisted in `storage`. Entries interrupted mid-drain
    /// go back to `Queued`.
    pub fn restore(storage: Arc<dyn KeyValueStorage>) -> Self {
        let mut entries: Vec<QueuedWrite> = match storage.get(QUEUE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("discarding unreadable write queue: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("failed to read write queue: {}", e);
                Vec::new()
            }
        };

        for entry in entries.iter_mut() {
            entry.state = EntryState::Queued;
        }
        let next_generation = entries.iter().map(|e| e.generation).max().unwrap_or(0) + 1;

        if !entries.is_empty() {
            info!("restored {} queued workspace writes", entries.len());
        }

        Self {
            storage: Some(storage),
            entries: Mutex::new(entries),
            draining: AtomicBool::new(false),
            next_generation: AtomicU64::new(next_generation),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<QueuedWrite>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// False if the queue could not be written to storage.
    fn persist(&self, entries: &[QueuedWrite]) -> bool {
        let Some(storage) = &self.storage else {
            return true;
        };
        let result = if entries.is_empty() {
            storage.remove(QUEUE_KEY)
        } else {
            match serde_json::to_string(entries) {
                Ok(raw) => storage.set(QUEUE_KEY, &raw),
                Err(e) => Err(e.into()),
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to persist write queue: {}", e);
                false
            }
        }
    }

    /// Queue `nodes`/`edges` as the pending write for `workspace_id`,
    /// replacing any payload already waiting for that workspace. Returns
    /// false when the entry is held in memory only because storage failed.
    pub fn queue_save(&self, workspace_id: &str, nodes: Vec<Node>, edges: Vec<Edge>) -> bool {
        self.queue_save_at(workspace_id, nodes, edges, Utc::now())
    }

    /// Like [`queue_save`](Self::queue_save), stamping the entry with the
    /// time the payload was captured. The drain writes this stamp to the
    /// remote, so callers can track it as their own last hand-off.
    pub fn queue_save_at(
        &self,
        workspace_id: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        enqueued_at: DateTime<Utc>,
    ) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries();

        match entries.iter_mut().find(|e| e.workspace_id == workspace_id) {
            Some(entry) => {
                entry.nodes = nodes;
                entry.edges = edges;
                entry.enqueued_at = enqueued_at;
                entry.generation = generation;
                debug!("coalesced queued write for {}", workspace_id);
            }
            None => {
                entries.push(QueuedWrite {
                    workspace_id: workspace_id.to_string(),
                    nodes,
                    edges,
                    enqueued_at,
                    generation,
                    attempts: 0,
                    state: EntryState::Queued,
                });
                debug!("queued write for {} ({} pending)", workspace_id, entries.len());
            }
        }

        self.persist(&entries)
    }

    pub fn pending_count(&self) -> usize {
        self.entries().len()
    }

    /// Workspaces with a pending write, in drain order.
    pub fn pending_workspaces(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.workspace_id.clone()).collect()
    }

    pub fn entry_state(&self, workspace_id: &str) -> Option<EntryState> {
        self.entries()
            .iter()
            .find(|e| e.workspace_id == workspace_id)
            .map(|e| e.state)
    }

    pub fn entries_snapshot(&self) -> Vec<QueuedWrite> {
        self.entries().clone()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn begin_entry(&self, workspace_id: &str) -> Option<InFlight> {
        let mut entries = self.entries();
        let entry = entries.iter_mut().find(|e| e.workspace_id == workspace_id)?;
        entry.state = EntryState::Draining;
        let in_flight = InFlight {
            nodes: entry.nodes.clone(),
            edges: entry.edges.clone(),
            enqueued_at: entry.enqueued_at,
            generation: entry.generation,
        };
        self.persist(&entries);
        Some(in_flight)
    }

    /// Remove the entry if it still carries `generation`. A newer payload
    /// that arrived while in flight stays queued.
    fn finish_entry(&self, workspace_id: &str, generation: u64) {
        let mut entries = self.entries();
        if let Some(index) = entries.iter().position(|e| e.workspace_id == workspace_id) {
            if entries[index].generation == generation {
                entries.remove(index);
            } else {
                entries[index].state = EntryState::Queued;
                debug!("kept newer payload for {} queued after drain", workspace_id);
            }
        }
        self.persist(&entries);
    }

    fn requeue_entry(&self, workspace_id: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.iter_mut().find(|e| e.workspace_id == workspace_id) {
            entry.state = EntryState::Queued;
            entry.attempts = entry.attempts.saturating_add(1);
        }
        self.persist(&entries);
    }

    /// Flush queued writes to `remote` in FIFO order.
    ///
    /// Each entry is checked against the remote workspace's last update time
    /// before it is committed. A transport failure leaves that entry queued
    /// and stops the drain so later workspaces do not overtake it.
    pub async fn drain_queue(
        &self,
        remote: &dyn RemoteStore,
        user_id: &str,
        policy: ConflictPolicy,
    ) -> DrainReport {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("drain already in progress");
            return DrainReport::skipped();
        }
        let _guard = DrainGuard(&self.draining);

        let order = self.pending_workspaces();
        let mut report = DrainReport::default();
        if order.is_empty() {
            return report;
        }
        info!("draining {} queued workspace writes", order.len());

        for workspace_id in order {
            let Some(in_flight) = self.begin_entry(&workspace_id) else {
                continue;
            };

            let server_updated_at = match remote.workspace_updated_at(user_id, &workspace_id).await {
                Ok(updated_at) => updated_at,
                Err(e) => {
                    warn!("drain of {} failed reading remote state: {}", workspace_id, e);
                    self.requeue_entry(&workspace_id);
                    report.failed.push(workspace_id);
                    break;
                }
            };

            if let Some(server) = server_updated_at {
                let check = check_for_conflict(in_flight.enqueued_at, server);
                if check.has_conflict {
                    let committed = policy == ConflictPolicy::PreferLocal;
                    warn!(
                        "conflict on {}: remote updated {} after local capture {} ({})",
                        workspace_id, check.server_timestamp, check.local_timestamp, policy
                    );
                    report.conflicts.push(ConflictReport {
                        workspace_id: workspace_id.clone(),
                        local_timestamp: check.local_timestamp,
                        server_timestamp: check.server_timestamp,
                        committed,
                    });
                    if !committed {
                        self.finish_entry(&workspace_id, in_flight.generation);
                        continue;
                    }
                }
            }

            match remote
                .save_workspace(
                    user_id,
                    &workspace_id,
                    &in_flight.nodes,
                    &in_flight.edges,
                    in_flight.enqueued_at,
                )
                .await
            {
                Ok(()) => {
                    self.finish_entry(&workspace_id, in_flight.generation);
                    debug!("committed queued write for {}", workspace_id);
                    report.committed.push(workspace_id);
                }
                Err(e) => {
                    warn!("drain of {} failed: {}", workspace_id, e);
                    self.requeue_entry(&workspace_id);
                    report.failed.push(workspace_id);
                    break;
                }
            }
        }

        info!(
            "drain finished: {} committed, {} conflicts, {} failed, {} still pending",
            report.committed.len(),
            report.conflicts.len(),
            report.failed.len(),
            self.pending_count()
        );
        report
    }
}
