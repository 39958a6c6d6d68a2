use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Node type that never takes part in layout, depth or descendant counts.
pub const THOUGHT_TYPE: &str = "thought";

pub const DEFAULT_NODE_TYPE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Placement of a node. `x`/`y` are grid units, `height` is pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub height: Option<f64>,
    pub manual: bool,
}

impl Position {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// The DAG edges. The first entry is the primary parent.
    pub parent_ids: Vec<NodeId>,
    pub role: String,
    pub node_type: String,
    pub content: Option<String>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub data: Option<serde_json::Value>,
    pub position: Position,
}

impl Node {
    pub fn primary_parent(&self) -> Option<&NodeId> {
        self.parent_ids.first()
    }

    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    pub fn is_thought(&self) -> bool {
        self.node_type == THOUGHT_TYPE
    }

    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parent_ids.iter().any(|id| id.as_str() == parent_id)
    }
}

/// Input record for the add operations.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub id: Option<NodeId>,
    pub parent_ids: Vec<NodeId>,
    pub role: String,
    pub node_type: String,
    pub content: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub data: Option<serde_json::Value>,
    /// Grid position. Given positions are pinned and skipped by automatic layout.
    pub position: Option<(f64, f64)>,
    pub height: Option<f64>,
}

impl NewNode {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            parent_ids: Vec::new(),
            role: role.into(),
            node_type: DEFAULT_NODE_TYPE.to_string(),
            content: Some(content.into()),
            status: None,
            created_at: None,
            tags: Vec::new(),
            data: None,
            position: None,
            height: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<NodeId>) -> Self {
        self.parent_ids.push(parent.into());
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some((x, y));
        self
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = Some(height);
        self
    }

    pub fn into_node(self) -> Node {
        let id = self.id.unwrap_or_else(NodeId::generate);
        let mut parent_ids: Vec<NodeId> = Vec::with_capacity(self.parent_ids.len());
        for parent in self.parent_ids {
            if parent != id && !parent_ids.contains(&parent) {
                parent_ids.push(parent);
            }
        }
        let position = match self.position {
            Some((x, y)) => Position {
                x,
                y,
                height: self.height,
                manual: true,
            },
            None => Position {
                height: self.height,
                ..Default::default()
            },
        };
        Node {
            id,
            parent_ids,
            role: self.role,
            node_type: self.node_type,
            content: self.content,
            status: self.status,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            tags: self.tags,
            data: self.data,
            position,
        }
    }
}

/// Partial update applied by `update_node`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub content: Option<String>,
    pub role: Option<String>,
    pub node_type: Option<String>,
    pub status: Option<String>,
    pub tags: Option<Vec<String>>,
    pub data: Option<serde_json::Value>,
}

impl NodeUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.role.is_none()
            && self.node_type.is_none()
            && self.status.is_none()
            && self.tags.is_none()
            && self.data.is_none()
    }

    pub(crate) fn apply(self, node: &mut Node) {
        if let Some(content) = self.content {
            node.content = Some(content);
        }
        if let Some(role) = self.role {
            node.role = role;
        }
        if let Some(node_type) = self.node_type {
            node.node_type = node_type;
        }
        if let Some(status) = self.status {
            node.status = Some(status);
        }
        if let Some(tags) = self.tags {
            node.tags = tags;
        }
        if let Some(data) = self.data {
            node.data = Some(data);
        }
    }
}
