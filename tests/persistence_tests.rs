use canvas_graph::{Node, NodeType, Position, WorkspaceSnapshot};
use canvas_sync::cache::SnapshotCache;
use canvas_sync::storage::{DuckDbStorage, KeyValueStorage};
use canvas_sync::sync::{EntryState, OfflineQueue};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn snapshot(workspace: &str) -> WorkspaceSnapshot {
    let node = Node::new(
        format!("{}-node", workspace),
        workspace,
        NodeType::Idea,
        Position::new(10.0, 20.0),
        json!({"text": workspace}),
    );
    WorkspaceSnapshot::new(vec![node], vec![])
}

#[test]
fn eviction_order_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.duckdb");

    {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(DuckDbStorage::open(&db_path).unwrap());
        let cache = SnapshotCache::new(storage, 3);
        for ws in ["a", "b", "c"] {
            assert!(cache.set(ws, &snapshot(ws)));
        }
        // Reads never refresh an entry.
        assert!(cache.get("a").is_some());
    }

    let storage: Arc<dyn KeyValueStorage> = Arc::new(DuckDbStorage::open(&db_path).unwrap());
    let cache = SnapshotCache::new(Arc::clone(&storage), 3);
    assert_eq!(cache.cached_ids(), vec!["c", "b", "a"]);

    assert!(cache.set("d", &snapshot("d")));
    assert!(cache.get("a").is_none());
    assert!(storage.get("canvas-sync:snapshot:a").unwrap().is_none());
    assert_eq!(cache.get("d").unwrap().nodes[0].id, "d-node");
}

#[test]
fn twenty_two_workspaces_evict_the_first_two() {
    let dir = tempdir().unwrap();
    let storage: Arc<dyn KeyValueStorage> =
        Arc::new(DuckDbStorage::open(dir.path().join("lru.duckdb")).unwrap());
    let cache = SnapshotCache::new(storage, 20);

    for i in 0..22 {
        let ws = format!("ws-{}", i);
        cache.set(&ws, &snapshot(&ws));
    }

    assert_eq!(cache.len(), 20);
    assert!(cache.get("ws-0").is_none());
    assert!(cache.get("ws-1").is_none());
    assert!(cache.get("ws-2").is_some());
    assert!(cache.get("ws-21").is_some());
}

#[test]
fn queued_writes_survive_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("queue.duckdb");

    {
        let storage = Arc::new(DuckDbStorage::open(&db_path).unwrap());
        let queue = OfflineQueue::restore(storage.clone());
        assert!(queue.queue_save("first", snapshot("first").nodes, vec![]));
        assert!(queue.queue_save("second", vec![], vec![]));
        assert!(queue.queue_save("first", vec![], vec![]));
        storage.checkpoint().unwrap();
    }

    let storage = Arc::new(DuckDbStorage::open(&db_path).unwrap());
    let queue = OfflineQueue::restore(storage);
    assert_eq!(queue.pending_workspaces(), vec!["first", "second"]);
    assert_eq!(queue.entry_state("first"), Some(EntryState::Queued));
    assert!(queue.entries_snapshot()[0].nodes.is_empty());
}
