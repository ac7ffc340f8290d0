use crate::types::{Edge, Node, Position, TraversalDirection, WorkspaceSnapshot};
use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub const MIN_NODE_WIDTH: f64 = 160.0;
pub const MAX_NODE_WIDTH: f64 = 1600.0;
pub const MIN_NODE_HEIGHT: f64 = 80.0;
pub const MAX_NODE_HEIGHT: f64 = 1600.0;

const EVENT_CAPACITY: usize = 256;

/// What part of the graph a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Nodes,
    Edges,
    Selection,
    /// Bulk replacement or clear; every consumer should re-read.
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphChange {
    pub workspace_id: String,
    pub revision: u64,
    pub kind: ChangeKind,
}

/// Filtered view over the store's change feed. Dropping it unsubscribes.
pub struct GraphSubscription {
    receiver: broadcast::Receiver<GraphChange>,
    kinds: Option<HashSet<ChangeKind>>,
}

impl GraphSubscription {
    fn wants(&self, change: &GraphChange) -> bool {
        change.kind == ChangeKind::Replaced
            || self
                .kinds
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&change.kind))
    }

    /// Wait for the next matching change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<GraphChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.wants(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("graph subscriber lagged by {} changes", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll for the next matching change.
    pub fn try_recv(&mut self) -> Option<GraphChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if self.wants(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Canonical in-memory node/edge graph of the active workspace.
///
/// Node and edge collections are held behind `Arc` and rebuilt copy-on-write,
/// so a revision handed out by [`GraphStore::nodes_arc`] is never mutated.
pub struct GraphStore {
    workspace_id: String,
    nodes: Arc<Vec<Node>>,
    edges: Arc<Vec<Edge>>,
    selection: HashSet<String>,
    revision: u64,
    events: broadcast::Sender<GraphChange>,
}

impl GraphStore {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            workspace_id: workspace_id.into(),
            nodes: Arc::new(Vec::new()),
            edges: Arc::new(Vec::new()),
            selection: HashSet::new(),
            revision: 0,
            events,
        }
    }

    pub fn from_snapshot(workspace_id: impl Into<String>, snapshot: WorkspaceSnapshot) -> Self {
        let mut store = Self::new(workspace_id);
        store.load_snapshot(snapshot);
        store
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Shared handle on the current node revision.
    pub fn nodes_arc(&self) -> Arc<Vec<Node>> {
        Arc::clone(&self.nodes)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == edge_id)
    }

    /// Content side-channel for renderers holding a [`crate::DataShell`].
    pub fn node_content(&self, node_id: &str) -> Option<&JsonValue> {
        self.node(node_id).map(|n| &n.data)
    }

    pub fn selection(&self) -> &HashSet<String> {
        &self.selection
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&self) -> GraphSubscription {
        GraphSubscription {
            receiver: self.events.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to a subset of change kinds. `Replaced` is always delivered.
    pub fn subscribe_to(&self, kinds: &[ChangeKind]) -> GraphSubscription {
        GraphSubscription {
            receiver: self.events.subscribe(),
            kinds: Some(kinds.iter().copied().collect()),
        }
    }

    fn publish(&mut self, kind: ChangeKind) {
        self.revision += 1;
        // No receivers is fine.
        let _ = self.events.send(GraphChange {
            workspace_id: self.workspace_id.clone(),
            revision: self.revision,
            kind,
        });
    }

    fn node_index(&self, node_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == node_id)
    }

    /// Apply `f` to a copy of the node and commit it. Returns false when the
    /// node is missing or `f` reports no change.
    fn modify_node(&mut self, node_id: &str, f: impl FnOnce(&mut Node) -> bool) -> bool {
        let Some(index) = self.node_index(node_id) else {
            debug!("ignoring mutation of unknown node {}", node_id);
            return false;
        };

        let mut updated = self.nodes[index].clone();
        if !f(&mut updated) {
            return false;
        }
        updated.updated_at = Utc::now();

        Arc::make_mut(&mut self.nodes)[index] = updated;
        self.publish(ChangeKind::Nodes);
        true
    }

    // ---------- Node Operations ----------

    pub fn add_node(&mut self, mut node: Node) -> bool {
        if self.node_index(&node.id).is_some() {
            debug!("node {} already exists in {}", node.id, self.workspace_id);
            return false;
        }
        node.workspace_id = self.workspace_id.clone();
        Arc::make_mut(&mut self.nodes).push(node);
        self.publish(ChangeKind::Nodes);
        true
    }

    pub fn update_node_position(&mut self, node_id: &str, position: Position) -> bool {
        if !position.x.is_finite() || !position.y.is_finite() {
            return false;
        }
        self.modify_node(node_id, |node| {
            if node.position == position {
                return false;
            }
            node.position = position;
            true
        })
    }

    /// Resize a node, clamping into the allowed dimension range.
    pub fn update_node_dimensions(&mut self, node_id: &str, width: f64, height: f64) -> bool {
        if !width.is_finite() || !height.is_finite() {
            return false;
        }
        let width = width.clamp(MIN_NODE_WIDTH, MAX_NODE_WIDTH);
        let height = height.clamp(MIN_NODE_HEIGHT, MAX_NODE_HEIGHT);
        self.modify_node(node_id, |node| {
            if node.width == Some(width) && node.height == Some(height) {
                return false;
            }
            node.width = Some(width);
            node.height = Some(height);
            true
        })
    }

    /// Set a single field of the node's content object.
    pub fn update_node_data(&mut self, node_id: &str, field: &str, value: JsonValue) -> bool {
        self.modify_node(node_id, |node| {
            match &mut node.data {
                JsonValue::Object(map) => {
                    if map.get(field) == Some(&value) {
                        return false;
                    }
                    map.insert(field.to_string(), value);
                }
                other => {
                    let mut map = Map::new();
                    map.insert(field.to_string(), value);
                    *other = JsonValue::Object(map);
                }
            }
            true
        })
    }

    pub fn set_node_pinned(&mut self, node_id: &str, pinned: bool) -> bool {
        self.modify_node(node_id, |node| {
            if node.pinned == pinned {
                return false;
            }
            node.pinned = pinned;
            true
        })
    }

    pub fn toggle_node_pinned(&mut self, node_id: &str) -> bool {
        match self.node(node_id) {
            Some(node) => {
                let pinned = !node.pinned;
                self.set_node_pinned(node_id, pinned)
            }
            None => false,
        }
    }

    /// Remove a node together with every edge touching it.
    pub fn delete_node(&mut self, node_id: &str) -> bool {
        let Some(index) = self.node_index(node_id) else {
            return false;
        };

        Arc::make_mut(&mut self.nodes).remove(index);

        let before = self.edges.len();
        let kept: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| !e.touches(node_id))
            .cloned()
            .collect();
        if kept.len() != before {
            debug!(
                "pruned {} edges attached to deleted node {}",
                before - kept.len(),
                node_id
            );
            self.edges = Arc::new(kept);
        }

        self.selection.remove(node_id);
        self.publish(ChangeKind::Replaced);
        true
    }

    /// Bulk replace nodes, e.g. after a load. Edges and selection entries that
    /// no longer resolve are pruned.
    pub fn set_nodes(&mut self, nodes: Vec<Node>) {
        let mut seen = HashSet::new();
        let nodes: Vec<Node> = nodes
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .map(|mut n| {
                n.workspace_id = self.workspace_id.clone();
                n
            })
            .collect();

        self.nodes = Arc::new(nodes);
        self.prune_dangling_edges();
        let ids = ids_of(&self.nodes);
        self.selection.retain(|id| ids.contains(id.as_str()));
        self.publish(ChangeKind::Replaced);
    }

    // ---------- Edge Operations ----------

    pub fn add_edge(&mut self, mut edge: Edge) -> bool {
        if self.edge(&edge.id).is_some() {
            debug!("edge {} already exists in {}", edge.id, self.workspace_id);
            return false;
        }
        if self.node(&edge.source_node_id).is_none() || self.node(&edge.target_node_id).is_none() {
            debug!(
                "rejecting edge {}: endpoint missing ({} -> {})",
                edge.id, edge.source_node_id, edge.target_node_id
            );
            return false;
        }
        edge.workspace_id = self.workspace_id.clone();
        Arc::make_mut(&mut self.edges).push(edge);
        self.publish(ChangeKind::Edges);
        true
    }

    pub fn delete_edge(&mut self, edge_id: &str) -> bool {
        let Some(index) = self.edges.iter().position(|e| e.id == edge_id) else {
            return false;
        };
        Arc::make_mut(&mut self.edges).remove(index);
        self.publish(ChangeKind::Edges);
        true
    }

    /// Bulk replace edges. Duplicates and edges with missing endpoints are dropped.
    pub fn set_edges(&mut self, edges: Vec<Edge>) {
        let mut seen = HashSet::new();
        let workspace_id = self.workspace_id.clone();
        let edges: Vec<Edge> = edges
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .map(|mut e| {
                e.workspace_id = workspace_id.clone();
                e
            })
            .collect();
        self.edges = Arc::new(edges);
        self.prune_dangling_edges();
        self.publish(ChangeKind::Edges);
    }

    fn prune_dangling_edges(&mut self) {
        let ids = ids_of(&self.nodes);
        let dangling = self
            .edges
            .iter()
            .filter(|e| {
                !ids.contains(e.source_node_id.as_str()) || !ids.contains(e.target_node_id.as_str())
            })
            .count();
        if dangling == 0 {
            return;
        }

        debug!("pruning {} dangling edges in {}", dangling, self.workspace_id);
        let kept: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| {
                ids.contains(e.source_node_id.as_str()) && ids.contains(e.target_node_id.as_str())
            })
            .cloned()
            .collect();
        self.edges = Arc::new(kept);
    }

    // ---------- Selection ----------

    pub fn select_node(&mut self, node_id: &str, additive: bool) -> bool {
        if self.node(node_id).is_none() {
            return false;
        }
        if !additive {
            self.selection.clear();
        }
        self.selection.insert(node_id.to_string());
        self.publish(ChangeKind::Selection);
        true
    }

    pub fn deselect_node(&mut self, node_id: &str) -> bool {
        if !self.selection.remove(node_id) {
            return false;
        }
        self.publish(ChangeKind::Selection);
        true
    }

    pub fn set_selection<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known = ids_of(&self.nodes);
        let selection: HashSet<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| known.contains(id.as_str()))
            .collect();
        self.selection = selection;
        self.publish(ChangeKind::Selection);
    }

    pub fn clear_selection(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        self.selection.clear();
        self.publish(ChangeKind::Selection);
    }

    // ---------- Workspace ----------

    pub fn clear(&mut self) {
        self.nodes = Arc::new(Vec::new());
        self.edges = Arc::new(Vec::new());
        self.selection.clear();
        self.publish(ChangeKind::Replaced);
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot::new(self.nodes.to_vec(), self.edges.to_vec())
    }

    pub fn load_snapshot(&mut self, snapshot: WorkspaceSnapshot) {
        self.set_nodes(snapshot.nodes);
        self.set_edges(snapshot.edges);
    }

    // ---------- Traversal ----------

    /// Ancestors of `node_id` reachable over incoming edges, nearest first.
    /// Reverse the result for furthest-first order.
    pub fn get_upstream_nodes(&self, node_id: &str) -> Vec<Node> {
        self.traverse(node_id, TraversalDirection::Incoming)
    }

    pub fn get_downstream_nodes(&self, node_id: &str) -> Vec<Node> {
        self.traverse(node_id, TraversalDirection::Outgoing)
    }

    /// Breadth-first walk in `direction`. Each node is visited at most once,
    /// so cycles terminate. O(V + E).
    pub fn traverse(&self, node_id: &str, direction: TraversalDirection) -> Vec<Node> {
        let by_id: HashMap<&str, &Node> = self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        if !by_id.contains_key(node_id) {
            return Vec::new();
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.edges.iter() {
            let (from, to) = match direction {
                TraversalDirection::Incoming => (edge.target_node_id.as_str(), edge.source_node_id.as_str()),
                TraversalDirection::Outgoing => (edge.source_node_id.as_str(), edge.target_node_id.as_str()),
            };
            adjacency.entry(from).or_default().push(to);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut result = Vec::new();

        visited.insert(node_id);
        queue.push_back(node_id);

        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = adjacency.get(current) else {
                continue;
            };
            for &next in neighbors {
                if !visited.insert(next) {
                    continue;
                }
                if let Some(node) = by_id.get(next) {
                    result.push((*node).clone());
                    queue.push_back(next);
                }
            }
        }

        result
    }
}

fn ids_of(nodes: &[Node]) -> HashSet<&str> {
    nodes.iter().map(|n| n.id.as_str()).collect()
}
