//! Persistent snapshot cache.
//!
//! Maps workspace ids to serialized [`WorkspaceSnapshot`]s so a workspace can
//! be hydrated before the remote fetch completes. The cache is bounded: a
//! write-order index (an [`LruCache`] that is only promoted on writes) decides
//! which snapshot to evict, and is persisted next to the snapshots so eviction
//! order survives restarts.
//!
//! This is a best-effort acceleration layer. Every storage failure is logged
//! and reported as `None`/`false`.

use crate::storage::KeyValueStorage;
use canvas_graph::{WorkspaceMetadata, WorkspaceSnapshot};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_MAX_ENTRIES: usize = 20;

const SNAPSHOT_PREFIX: &str = "canvas-sync:snapshot:";
const INDEX_KEY: &str = "canvas-sync:snapshot-index";
const METADATA_KEY: &str = "canvas-sync:workspaces";

fn snapshot_key(workspace_id: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, workspace_id)
}

pub struct SnapshotCache {
    storage: Arc<dyn KeyValueStorage>,
    index: Mutex<LruCache<String, ()>>,
}

impl SnapshotCache {
    pub fn new(storage: Arc<dyn KeyValueStorage>, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or_else(|| {
            warn!("snapshot cache capacity must be positive, using 1");
            NonZeroUsize::MIN
        });
        let cache = Self {
            storage,
            index: Mutex::new(LruCache::new(capacity)),
        };
        cache.restore_index();
        cache
    }

    fn index(&self) -> MutexGuard<'_, LruCache<String, ()>> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rebuild the write-order index from storage. Snapshots the index does not
    /// know about are treated as the oldest entries.
    fn restore_index(&self) {
        let mut ordered: Vec<String> = match self.storage.get(INDEX_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("discarding unreadable snapshot index: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("snapshot index unavailable: {}", e);
                return;
            }
        };

        if let Ok(keys) = self.storage.keys_with_prefix(SNAPSHOT_PREFIX) {
            let orphans: Vec<String> = keys
                .iter()
                .filter_map(|k| k.strip_prefix(SNAPSHOT_PREFIX))
                .filter(|id| !ordered.iter().any(|known| known.as_str() == *id))
                .map(str::to_string)
                .collect();
            if !orphans.is_empty() {
                debug!("adopting {} unindexed snapshots", orphans.len());
                ordered.splice(0..0, orphans);
            }
        }

        let mut evicted = Vec::new();
        {
            let mut index = self.index();
            for id in ordered {
                if let Some((old, _)) = index.push(id.clone(), ()) {
                    if old != id {
                        evicted.push(old);
                    }
                }
            }
        }
        for id in &evicted {
            self.remove_snapshot_entry(id);
        }
        if !evicted.is_empty() {
            self.persist_index();
        }
    }

    fn persist_index(&self) -> bool {
        // Oldest first
        let ordered: Vec<String> = self.index().iter().rev().map(|(k, _)| k.clone()).collect();
        let raw = match serde_json::to_string(&ordered) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed to serialize snapshot index: {}", e);
                return false;
            }
        };
        match self.storage.set(INDEX_KEY, &raw) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to persist snapshot index: {}", e);
                false
            }
        }
    }

    fn remove_snapshot_entry(&self, workspace_id: &str) -> bool {
        match self.storage.remove(&snapshot_key(workspace_id)) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to remove cached snapshot {}: {}", workspace_id, e);
                false
            }
        }
    }

    pub fn get(&self, workspace_id: &str) -> Option<WorkspaceSnapshot> {
        let raw = match self.storage.get(&snapshot_key(workspace_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("snapshot cache read failed for {}: {}", workspace_id, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("dropping corrupt cached snapshot {}: {}", workspace_id, e);
                self.remove(workspace_id);
                None
            }
        }
    }

    /// Store a snapshot, evicting the least-recently-written entry at capacity.
    pub fn set(&self, workspace_id: &str, snapshot: &WorkspaceSnapshot) -> bool {
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed to serialize snapshot {}: {}", workspace_id, e);
                return false;
            }
        };

        if let Err(e) = self.storage.set(&snapshot_key(workspace_id), &raw) {
            warn!("snapshot cache write failed for {}: {}", workspace_id, e);
            return false;
        }

        let evicted = self
            .index()
            .push(workspace_id.to_string(), ())
            .map(|(id, _)| id)
            .filter(|id| id != workspace_id);
        if let Some(id) = evicted {
            debug!("evicting cached snapshot {}", id);
            self.remove_snapshot_entry(&id);
        }

        self.persist_index();
        true
    }

    pub fn remove(&self, workspace_id: &str) -> bool {
        let removed = self.remove_snapshot_entry(workspace_id);
        if self.index().pop(workspace_id).is_some() {
            self.persist_index();
        }
        removed
    }

    /// Drop every cached snapshot, the index and the workspace listing.
    pub fn clear(&self) -> bool {
        let mut ok = true;
        let mut ids: Vec<String> = self.index().iter().map(|(k, _)| k.clone()).collect();
        match self.storage.keys_with_prefix(SNAPSHOT_PREFIX) {
            Ok(keys) => ids.extend(
                keys.iter()
                    .filter_map(|k| k.strip_prefix(SNAPSHOT_PREFIX))
                    .map(str::to_string),
            ),
            Err(e) => {
                warn!("failed to list cached snapshots: {}", e);
                ok = false;
            }
        }
        ids.sort();
        ids.dedup();

        for id in &ids {
            ok &= self.remove_snapshot_entry(id);
        }
        self.index().clear();

        for key in [INDEX_KEY, METADATA_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("failed to remove {}: {}", key, e);
                ok = false;
            }
        }
        ok
    }

    /// Workspace ids currently cached, most recently written first.
    pub fn cached_ids(&self) -> Vec<String> {
        self.index().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.index().cap().get()
    }

    // ---------- Workspace listing ----------

    pub fn get_metadata(&self) -> Vec<WorkspaceMetadata> {
        match self.storage.get(METADATA_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("discarding unreadable workspace listing: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("workspace listing unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub fn set_metadata(&self, metadata: &[WorkspaceMetadata]) -> bool {
        let raw = match serde_json::to_string(metadata) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed to serialize workspace listing: {}", e);
                return false;
            }
        };
        match self.storage.set(METADATA_KEY, &raw) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to store workspace listing: {}", e);
                false
            }
        }
    }

    /// Insert or replace a single listing entry.
    pub fn upsert_metadata(&self, entry: WorkspaceMetadata) -> bool {
        let mut listing = self.get_metadata();
        match listing.iter_mut().find(|m| m.id == entry.id) {
            Some(existing) => *existing = entry,
            None => listing.push(entry),
        }
        self.set_metadata(&listing)
    }
}
