pub mod graph_store;
pub mod reconcile;
pub mod types;

pub use graph_store::{
    ChangeKind, GraphChange, GraphStore, GraphSubscription, MAX_NODE_HEIGHT, MAX_NODE_WIDTH,
    MIN_NODE_HEIGHT, MIN_NODE_WIDTH,
};
pub use reconcile::{reconcile, Reconciler, RenderList};
pub use types::{
    DataShell, Edge, Node, NodeType, Position, RelationshipType, RenderNode, TraversalDirection,
    WorkspaceMetadata, WorkspaceSnapshot,
};
