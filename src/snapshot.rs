use crate::error::{GraphError, Result};
use crate::model::{DEFAULT_NODE_TYPE, Node, NodeId, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub const SNAPSHOT_VERSION: u64 = 1;

/// Persisted form of a whole conversation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub active_node_id: Option<NodeId>,
    pub nodes: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    pub id: NodeId,
    pub parent_ids: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub role: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub metadata: SnapshotMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `x`/`y` are grid units, `height` is pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub manual_position: bool,
}

fn default_node_type() -> String {
    DEFAULT_NODE_TYPE.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl From<&Node> for SnapshotNode {
    fn from(node: &Node) -> Self {
        SnapshotNode {
            id: node.id.clone(),
            parent_ids: node.parent_ids.clone(),
            content: node.content.clone(),
            role: node.role.clone(),
            node_type: node.node_type.clone(),
            status: node.status.clone(),
            created_at: node.created_at,
            metadata: SnapshotMetadata {
                x: node.position.x,
                y: node.position.y,
                height: node.position.height,
                tags: if node.tags.is_empty() {
                    None
                } else {
                    Some(node.tags.clone())
                },
                manual_position: node.position.manual,
            },
            data: node.data.clone(),
        }
    }
}

impl SnapshotNode {
    pub fn into_node(self) -> Node {
        Node {
            id: self.id,
            parent_ids: self.parent_ids,
            role: self.role,
            node_type: self.node_type,
            content: self.content,
            status: self.status,
            created_at: self.created_at,
            tags: self.metadata.tags.unwrap_or_default(),
            data: self.data,
            position: Position {
                x: self.metadata.x,
                y: self.metadata.y,
                height: self.metadata.height,
                manual: self.metadata.manual_position,
            },
        }
    }
}

impl Snapshot {
    pub fn from_value(mut value: Value) -> Result<Snapshot> {
        normalize_legacy_parents(&mut value);
        let violations = validate_snapshot(&value);
        if !violations.is_empty() {
            return Err(GraphError::InvalidSnapshot { violations });
        }
        serde_json::from_value(value).map_err(|err| GraphError::InvalidSnapshot {
            violations: vec![err.to_string()],
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn parse_snapshot(text: &str) -> Result<Snapshot> {
    let value: Value = serde_json::from_str(text)?;
    Snapshot::from_value(value)
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let text = std::fs::read_to_string(path)?;
    parse_snapshot(&text)
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, snapshot)?;
    Ok(())
}

/// Rewrites the legacy single `parentId` field into a `parentIds` list.
fn normalize_legacy_parents(value: &mut Value) {
    let Some(nodes) = value.get_mut("nodes").and_then(Value::as_array_mut) else {
        return;
    };
    for node in nodes.iter_mut().filter_map(Value::as_object_mut) {
        if node.contains_key("parentIds") {
            continue;
        }
        let parents = match node.get("parentId") {
            Some(Value::String(parent)) => vec![Value::String(parent.clone())],
            Some(Value::Null) | None => Vec::new(),
            // Left alone so validation reports it.
            Some(_) => continue,
        };
        node.remove("parentId");
        node.insert("parentIds".to_string(), Value::Array(parents));
    }
}

/// Every shape violation in a raw snapshot, each prefixed with its JSON path.
pub fn validate_snapshot(value: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    let Some(root) = value.as_object() else {
        violations.push("$: expected an object".to_string());
        return violations;
    };

    match root.get("version") {
        Some(Value::Number(number)) => match number.as_u64() {
            Some(version) if (1..=SNAPSHOT_VERSION).contains(&version) => {}
            _ => violations.push(format!(
                "version: unsupported version {number}, expected 1..={SNAPSHOT_VERSION}"
            )),
        },
        Some(_) => violations.push("version: expected a number".to_string()),
        None => violations.push("version: missing".to_string()),
    }
    match root.get("createdAt") {
        Some(created) => check_timestamp(created, "createdAt", &mut violations),
        None => violations.push("createdAt: missing".to_string()),
    }
    check_optional_string(root, "title", "title", &mut violations);
    check_optional_string(root, "activeNodeId", "activeNodeId", &mut violations);

    let Some(nodes) = root.get("nodes") else {
        violations.push("nodes: missing".to_string());
        return violations;
    };
    let Some(nodes) = nodes.as_array() else {
        violations.push("nodes: expected an array".to_string());
        return violations;
    };
    let mut seen: HashSet<&str> = HashSet::new();
    for (idx, node) in nodes.iter().enumerate() {
        let path = format!("nodes[{idx}]");
        let Some(node) = node.as_object() else {
            violations.push(format!("{path}: expected an object"));
            continue;
        };
        let id = match node.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {
                if !seen.insert(id.as_str()) {
                    violations.push(format!("{path}.id: duplicate id {id:?}"));
                }
                Some(id.as_str())
            }
            Some(Value::String(_)) => {
                violations.push(format!("{path}.id: must not be empty"));
                None
            }
            Some(_) => {
                violations.push(format!("{path}.id: expected a string"));
                None
            }
            None => {
                violations.push(format!("{path}.id: missing"));
                None
            }
        };
        match node.get("parentIds") {
            Some(Value::Array(parents)) => {
                for (p, parent) in parents.iter().enumerate() {
                    match parent.as_str() {
                        Some(parent) if Some(parent) == id => violations
                            .push(format!("{path}.parentIds[{p}]: node lists itself as a parent")),
                        Some(_) => {}
                        None => violations.push(format!("{path}.parentIds[{p}]: expected a string")),
                    }
                }
            }
            Some(_) => violations.push(format!("{path}.parentIds: expected an array")),
            None => match node.get("parentId") {
                Some(_) => violations.push(format!("{path}.parentId: expected a string or null")),
                None => violations.push(format!("{path}.parentIds: missing")),
            },
        }
        match node.get("role") {
            Some(Value::String(_)) => {}
            Some(_) => violations.push(format!("{path}.role: expected a string")),
            None => violations.push(format!("{path}.role: missing")),
        }
        match node.get("type") {
            None | Some(Value::String(_)) => {}
            Some(_) => violations.push(format!("{path}.type: expected a string")),
        }
        check_optional_string(node, "content", &format!("{path}.content"), &mut violations);
        check_optional_string(node, "status", &format!("{path}.status"), &mut violations);
        if let Some(created) = node.get("createdAt") {
            check_timestamp(created, &format!("{path}.createdAt"), &mut violations);
        }
        match node.get("metadata") {
            Some(Value::Object(metadata)) => {
                check_metadata(metadata, &format!("{path}.metadata"), &mut violations)
            }
            Some(_) => violations.push(format!("{path}.metadata: expected an object")),
            None => violations.push(format!("{path}.metadata: missing")),
        }
    }
    violations
}

fn check_metadata(metadata: &Map<String, Value>, path: &str, violations: &mut Vec<String>) {
    for axis in ["x", "y"] {
        match metadata.get(axis).map(Value::as_f64) {
            Some(Some(value)) if value.is_finite() => {}
            Some(_) => violations.push(format!("{path}.{axis}: expected a finite number")),
            None => violations.push(format!("{path}.{axis}: missing")),
        }
    }
    match metadata.get("height") {
        None | Some(Value::Null) => {}
        Some(value) => match value.as_f64() {
            Some(height) if height.is_finite() && height >= 0.0 => {}
            _ => violations.push(format!("{path}.height: expected a non-negative number")),
        },
    }
    match metadata.get("tags") {
        None | Some(Value::Null) => {}
        Some(Value::Array(tags)) => {
            for (t, tag) in tags.iter().enumerate() {
                if !tag.is_string() {
                    violations.push(format!("{path}.tags[{t}]: expected a string"));
                }
            }
        }
        Some(_) => violations.push(format!("{path}.tags: expected an array of strings")),
    }
    match metadata.get("manualPosition") {
        None | Some(Value::Bool(_)) => {}
        Some(_) => violations.push(format!("{path}.manualPosition: expected a boolean")),
    }
}

fn check_optional_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Vec<String>,
) {
    match object.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => violations.push(format!("{path}: expected a string")),
    }
}

fn check_timestamp(value: &Value, path: &str, violations: &mut Vec<String>) {
    if timestamp::parse(value).is_none() {
        violations.push(format!(
            "{path}: expected an RFC 3339 string or epoch milliseconds"
        ));
    }
}

/// RFC 3339 on output; RFC 3339 or epoch milliseconds on input.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    impl NumberOrString {
        fn as_datetime(&self) -> Option<DateTime<Utc>> {
            match self {
                NumberOrString::Number(millis) if millis.is_finite() => {
                    DateTime::from_timestamp_millis(*millis as i64)
                }
                NumberOrString::Number(_) => None,
                NumberOrString::String(text) => DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|parsed| parsed.with_timezone(&Utc)),
            }
        }
    }

    pub(super) fn parse(value: &Value) -> Option<DateTime<Utc>> {
        NumberOrString::deserialize(value).ok()?.as_datetime()
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = NumberOrString::deserialize(deserializer)?;
        raw.as_datetime()
            .ok_or_else(|| serde::de::Error::custom("invalid timestamp"))
    }
}
