//! Render reconciliation with structural sharing.
//!
//! Converts domain [`Node`]s into [`RenderNode`]s, reusing the previous pass's
//! `Arc`s for every node whose structural fields are unchanged. Content lives
//! behind a per-id [`DataShell`] and is read through
//! [`GraphStore::node_content`], so editing text never allocates a new render
//! node.

use crate::graph_store::GraphStore;
use crate::types::{DataShell, Node, RenderNode};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type RenderList = Arc<Vec<Arc<RenderNode>>>;

fn is_unchanged(previous: &RenderNode, node: &Node, selected: bool, draggable: bool) -> bool {
    previous.position == node.position
        && previous.width == node.width
        && previous.height == node.height
        && previous.selected == selected
        && previous.pinned == node.pinned
        && previous.draggable == draggable
}

/// Reconcile `nodes` against the previous render list.
///
/// Returns `previous` itself when no element changed and the id sequence is
/// identical, so consumers memoizing on `Arc::ptr_eq` skip the pass entirely.
pub fn reconcile(
    nodes: &[Node],
    selection: &HashSet<String>,
    interaction_disabled: bool,
    previous: Option<&RenderList>,
) -> RenderList {
    let previous_by_id: HashMap<&str, &Arc<RenderNode>> = previous
        .map(|list| list.iter().map(|r| (r.id.as_str(), r)).collect())
        .unwrap_or_default();

    let next: Vec<Arc<RenderNode>> = nodes
        .iter()
        .map(|node| {
            let selected = selection.contains(&node.id);
            let draggable = node.is_draggable(interaction_disabled);
            let prior = previous_by_id.get(node.id.as_str());

            match prior {
                Some(prior) if is_unchanged(prior, node, selected, draggable) => Arc::clone(prior),
                _ => Arc::new(RenderNode {
                    id: node.id.clone(),
                    position: node.position,
                    width: node.width,
                    height: node.height,
                    selected,
                    pinned: node.pinned,
                    draggable,
                    data: prior
                        .map(|p| Arc::clone(&p.data))
                        .unwrap_or_else(|| Arc::new(DataShell { id: node.id.clone() })),
                }),
            }
        })
        .collect();

    if let Some(previous) = previous {
        let identical = previous.len() == next.len()
            && previous
                .iter()
                .zip(next.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b));
        if identical {
            return Arc::clone(previous);
        }
    }

    Arc::new(next)
}

/// Holds the previous pass so callers only supply the current graph state.
#[derive(Default)]
pub struct Reconciler {
    previous: Option<RenderList>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(
        &mut self,
        nodes: &[Node],
        selection: &HashSet<String>,
        interaction_disabled: bool,
    ) -> RenderList {
        let result = reconcile(nodes, selection, interaction_disabled, self.previous.as_ref());
        self.previous = Some(Arc::clone(&result));
        result
    }

    pub fn reconcile_store(&mut self, store: &GraphStore, interaction_disabled: bool) -> RenderList {
        self.reconcile(store.nodes(), store.selection(), interaction_disabled)
    }

    pub fn last(&self) -> Option<&RenderList> {
        self.previous.as_ref()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeType, Position};
    use serde_json::json;

    fn store_with(ids: &[&str]) -> GraphStore {
        let mut store = GraphStore::new("ws");
        for (i, id) in ids.iter().enumerate() {
            store.add_node(Node::new(
                *id,
                "ws",
                NodeType::Note,
                Position::new(i as f64 * 100.0, 0.0),
                json!({"text": id}),
            ));
        }
        store
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let result = reconcile(&[], &HashSet::new(), false, None);
        assert!(result.is_empty());

        let again = reconcile(&[], &HashSet::new(), false, Some(&result));
        assert!(Arc::ptr_eq(&result, &again));
    }

    #[test]
    fn unchanged_pass_returns_same_list() {
        let store = store_with(&["a", "b", "c"]);
        let mut reconciler = Reconciler::new();

        let first = reconciler.reconcile_store(&store, false);
        let second = reconciler.reconcile_store(&store, false);

        assert!(Arc::ptr_eq(&first, &second));
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn content_edit_keeps_list_identity() {
        let mut store = store_with(&["a", "b"]);
        let mut reconciler = Reconciler::new();
        let first = reconciler.reconcile_store(&store, false);

        assert!(store.update_node_data("a", "text", json!("rewritten")));
        let second = reconciler.reconcile_store(&store, false);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.node_content(&second[0].data.id).unwrap()["text"], "rewritten");
    }

    #[test]
    fn drag_reallocates_only_the_moved_node() {
        let mut store = store_with(&["a", "b", "c"]);
        let mut reconciler = Reconciler::new();
        let first = reconciler.reconcile_store(&store, false);

        store.update_node_position("b", Position::new(42.0, 7.0));
        let second = reconciler.reconcile_store(&store, false);

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(!Arc::ptr_eq(&first[1], &second[1]));
        assert!(Arc::ptr_eq(&first[2], &second[2]));
        assert_eq!(second[1].position, Position::new(42.0, 7.0));
        // The content shell is keyed by id and survives the reallocation.
        assert!(Arc::ptr_eq(&first[1].data, &second[1].data));
    }

    #[test]
    fn selection_change_reallocates_selected_node() {
        let mut store = store_with(&["a", "b"]);
        let mut reconciler = Reconciler::new();
        let first = reconciler.reconcile_store(&store, false);

        store.select_node("a", false);
        let second = reconciler.reconcile_store(&store, false);

        assert!(second[0].selected);
        assert!(!Arc::ptr_eq(&first[0], &second[0]));
        assert!(Arc::ptr_eq(&first[1], &second[1]));
    }

    #[test]
    fn additions_and_removals_preserve_untouched_elements() {
        let mut store = store_with(&["a", "b"]);
        let mut reconciler = Reconciler::new();
        let first = reconciler.reconcile_store(&store, false);

        store.add_node(Node::new("c", "ws", NodeType::Idea, Position::default(), json!({})));
        let second = reconciler.reconcile_store(&store, false);
        assert_eq!(second.len(), 3);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(Arc::ptr_eq(&first[1], &second[1]));

        store.delete_node("a");
        let third = reconciler.reconcile_store(&store, false);
        let ids: Vec<&str> = third.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(Arc::ptr_eq(&second[1], &third[0]));
        assert!(Arc::ptr_eq(&second[2], &third[1]));
    }

    #[test]
    fn reorder_produces_new_list() {
        let store = store_with(&["a", "b"]);
        let first = reconcile(store.nodes(), store.selection(), false, None);

        let reversed: Vec<Node> = store.nodes().iter().rev().cloned().collect();
        let second = reconcile(&reversed, store.selection(), false, Some(&first));

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first[0], &second[1]));
    }

    #[test]
    fn toggling_interaction_recomputes_draggability() {
        let mut store = store_with(&["a", "b"]);
        store.set_node_pinned("b", true);
        let mut reconciler = Reconciler::new();

        let enabled = reconciler.reconcile_store(&store, false);
        assert!(enabled[0].draggable);
        assert!(!enabled[1].draggable);

        let disabled = reconciler.reconcile_store(&store, true);
        assert!(!disabled[0].draggable);
        assert!(!Arc::ptr_eq(&enabled[0], &disabled[0]));
        // Pinned nodes were already immovable, so their render node is reused.
        assert!(Arc::ptr_eq(&enabled[1], &disabled[1]));
    }

    #[test]
    fn pinning_reallocates() {
        let mut store = store_with(&["a"]);
        let mut reconciler = Reconciler::new();
        let first = reconciler.reconcile_store(&store, false);

        store.toggle_node_pinned("a");
        let second = reconciler.reconcile_store(&store, false);
        assert!(second[0].pinned);
        assert!(!Arc::ptr_eq(&first[0], &second[0]));
    }
}
