use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A point on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub workspace_id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Opaque content payload, owned exclusively by this node.
    #[serde(default)]
    pub data: JsonValue,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draggable: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Build a node stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        node_type: NodeType,
        position: Position,
        data: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            node_type,
            data,
            position,
            width: None,
            height: None,
            pinned: false,
            draggable: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dimensions(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Whether the node can be dragged given the canvas interaction state.
    pub fn is_draggable(&self, interaction_disabled: bool) -> bool {
        !interaction_disabled && !self.pinned && self.draggable.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Idea,
    Note,
    Prompt,
    Response,
    Image,
    Group,
    Custom(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Idea => "idea",
            NodeType::Note => "note",
            NodeType::Prompt => "prompt",
            NodeType::Response => "response",
            NodeType::Image => "image",
            NodeType::Group => "group",
            NodeType::Custom(value) => value.as_str(),
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "idea" => NodeType::Idea,
            "note" => NodeType::Note,
            "prompt" => NodeType::Prompt,
            "response" => NodeType::Response,
            "image" => NodeType::Image,
            "group" => NodeType::Group,
            _ => NodeType::Custom(value.to_string()),
        }
    }
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        NodeType::from_str(&value)
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub workspace_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub relationship_type: RelationshipType,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            relationship_type,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipType {
    #[default]
    RelatesTo,
    DerivedFrom,
    Supports,
    Contradicts,
    Custom(String),
}

impl RelationshipType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipType::RelatesTo => "relates_to",
            RelationshipType::DerivedFrom => "derived_from",
            RelationshipType::Supports => "supports",
            RelationshipType::Contradicts => "contradicts",
            RelationshipType::Custom(value) => value.as_str(),
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "relates_to" => RelationshipType::RelatesTo,
            "derived_from" => RelationshipType::DerivedFrom,
            "supports" => RelationshipType::Supports,
            "contradicts" => RelationshipType::Contradicts,
            _ => RelationshipType::Custom(value.to_string()),
        }
    }
}

impl From<String> for RelationshipType {
    fn from(value: String) -> Self {
        RelationshipType::from_str(&value)
    }
}

impl From<RelationshipType> for String {
    fn from(value: RelationshipType) -> Self {
        value.as_str().to_string()
    }
}

/// Full node and edge state of one workspace at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub loaded_at: DateTime<Utc>,
}

impl WorkspaceSnapshot {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            loaded_at: Utc::now(),
        }
    }
}

/// Lightweight listing entry, stored independently of full snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMetadata {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Stable content indirection handed to the renderer. Carries only the id so
/// content changes never reach the reconciled structure.
#[derive(Debug, PartialEq, Eq)]
pub struct DataShell {
    pub id: String,
}

/// Render-ready projection of a [`Node`].
#[derive(Debug, Clone)]
pub struct RenderNode {
    pub id: String,
    pub position: Position,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub selected: bool,
    pub pinned: bool,
    pub draggable: bool,
    pub data: Arc<DataShell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Outgoing,
    Incoming,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_type_round_trips() {
        let variants = [
            (NodeType::Idea, "idea"),
            (NodeType::Note, "note"),
            (NodeType::Prompt, "prompt"),
            (NodeType::Response, "response"),
            (NodeType::Image, "image"),
            (NodeType::Group, "group"),
        ];

        for (variant, label) in variants {
            assert_eq!(variant.as_str(), label);
            assert_eq!(NodeType::from_str(label), variant);
        }

        // Unknown kinds are preserved verbatim
        assert_eq!(
            NodeType::from_str("sticky"),
            NodeType::Custom("sticky".to_string())
        );
    }

    #[test]
    fn relationship_type_defaults_to_relates_to() {
        let edge: Edge = serde_json::from_value(json!({
            "id": "e1",
            "workspaceId": "ws",
            "sourceNodeId": "a",
            "targetNodeId": "b"
        }))
        .unwrap();
        assert_eq!(edge.relationship_type, RelationshipType::RelatesTo);
    }

    #[test]
    fn node_dates_survive_json() {
        let node = Node::new("n1", "ws", NodeType::Note, Position::new(1.0, 2.0), json!({"text": "hi"}));
        let encoded = serde_json::to_string(&node).unwrap();
        assert!(encoded.contains("\"type\":\"note\""));

        let decoded: Node = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.created_at, node.created_at);
        assert_eq!(decoded.updated_at, node.updated_at);
        assert_eq!(decoded, node);
    }

    #[test]
    fn draggability_respects_pin_and_interaction() {
        let mut node = Node::new("n1", "ws", NodeType::Idea, Position::default(), JsonValue::Null);
        assert!(node.is_draggable(false));
        assert!(!node.is_draggable(true));

        node.pinned = true;
        assert!(!node.is_draggable(false));

        node.pinned = false;
        node.draggable = Some(false);
        assert!(!node.is_draggable(false));
    }
}
