use canvas_graph::{Edge, GraphStore, Node, NodeType, Position, Reconciler, RelationshipType};
use serde_json::json;
use std::sync::Arc;

fn idea(id: &str, x: f64) -> Node {
    Node::new(id, "ws-props", NodeType::Idea, Position::new(x, 0.0), json!({"text": id}))
}

fn build_graph(size: usize) -> GraphStore {
    let mut store = GraphStore::new("ws-props");
    for i in 0..size {
        store.add_node(idea(&format!("n{}", i), i as f64));
    }
    for i in 1..size {
        store.add_edge(Edge::new(
            format!("e{}", i),
            "ws-props",
            format!("n{}", i - 1),
            format!("n{}", i),
            RelationshipType::DerivedFrom,
        ));
    }
    store
}

#[test]
fn no_dangling_edges_after_any_deletion() {
    for victim in 0..8 {
        let mut store = build_graph(8);
        // Add some cross links so deletions hit both directions
        store.add_edge(Edge::new("x1", "ws-props", "n7", "n0", RelationshipType::Supports));
        store.add_edge(Edge::new("x2", "ws-props", "n3", "n6", RelationshipType::Contradicts));

        let id = format!("n{}", victim);
        assert!(store.delete_node(&id));
        assert!(
            store.edges().iter().all(|e| !e.touches(&id)),
            "edge still references {}",
            id
        );
        for edge in store.edges() {
            assert!(store.node(&edge.source_node_id).is_some());
            assert!(store.node(&edge.target_node_id).is_some());
        }
    }
}

#[test]
fn upstream_of_long_chain_is_nearest_first() {
    let store = build_graph(6);
    let upstream: Vec<String> = store
        .get_upstream_nodes("n5")
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(upstream, vec!["n4", "n3", "n2", "n1", "n0"]);

    let mut furthest_first = upstream.clone();
    furthest_first.reverse();
    assert_eq!(furthest_first.first().map(String::as_str), Some("n0"));
}

#[test]
fn upstream_visits_diamond_ancestors_once() {
    let mut store = GraphStore::new("ws-props");
    for id in ["root", "left", "right", "sink"] {
        store.add_node(idea(id, 0.0));
    }
    for (id, from, to) in [
        ("e1", "root", "left"),
        ("e2", "root", "right"),
        ("e3", "left", "sink"),
        ("e4", "right", "sink"),
    ] {
        store.add_edge(Edge::new(id, "ws-props", from, to, RelationshipType::RelatesTo));
    }

    let upstream: Vec<String> = store
        .get_upstream_nodes("sink")
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(upstream, vec!["left", "right", "root"]);
}

#[test]
fn render_list_tracks_store_order_and_cardinality() {
    let mut store = build_graph(5);
    let mut reconciler = Reconciler::new();

    let first = reconciler.reconcile_store(&store, false);
    assert_eq!(first.len(), store.nodes().len());

    store.delete_node("n2");
    store.add_node(idea("late", 99.0));
    let second = reconciler.reconcile_store(&store, false);

    let render_ids: Vec<&str> = second.iter().map(|r| r.id.as_str()).collect();
    let store_ids: Vec<&str> = store.nodes().iter().map(|n| n.id.as_str()).collect();
    assert_eq!(render_ids, store_ids);

    for rendered in second.iter() {
        if let Some(old) = first.iter().find(|r| r.id == rendered.id) {
            assert!(Arc::ptr_eq(old, rendered), "{} should be reused", rendered.id);
        }
    }
}

#[test]
fn repeated_content_edits_never_reallocate() {
    let mut store = build_graph(3);
    let mut reconciler = Reconciler::new();
    let baseline = reconciler.reconcile_store(&store, false);

    for i in 0..10 {
        store.update_node_data("n1", "text", json!(format!("draft {}", i)));
        store.update_node_data("n1", "color", json!("#ffcc00"));
        let pass = reconciler.reconcile_store(&store, false);
        assert!(Arc::ptr_eq(&baseline, &pass));
    }
}
