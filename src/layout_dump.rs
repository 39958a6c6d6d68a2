use crate::engine::ConversationGraph;
use crate::layout::{layout_bounds, node_rect};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Pixel-space picture of the laid-out graph for renderers and debugging.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDump {
    pub grid_step: f64,
    pub width: f64,
    pub height: f64,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDump {
    pub id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub manual: bool,
    pub collapsed: bool,
    pub hidden: bool,
    pub hidden_descendants: usize,
}

#[derive(Debug, Serialize)]
pub struct EdgeDump {
    pub from: String,
    pub to: String,
    pub primary: bool,
}

impl LayoutDump {
    pub fn from_graph(graph: &ConversationGraph) -> Self {
        let metrics = graph.metrics();
        let nodes = graph
            .nodes()
            .iter()
            .filter(|node| !node.is_thought())
            .map(|node| {
                let rect = node_rect(node, metrics);
                NodeDump {
                    id: node.id.to_string(),
                    role: node.role.clone(),
                    node_type: node.node_type.clone(),
                    x: rect.min_x,
                    y: rect.min_y,
                    width: rect.width(),
                    height: rect.height(),
                    manual: node.position.manual,
                    collapsed: graph.is_collapsed(node.id.as_str()),
                    hidden: graph.is_in_collapsed_subtree(node.id.as_str()),
                    hidden_descendants: graph.hidden_descendant_count(node.id.as_str()),
                }
            })
            .collect();

        let mut edges = Vec::new();
        for node in graph.nodes() {
            for (idx, parent) in node.parent_ids.iter().enumerate() {
                if graph.get(parent.as_str()).is_none() {
                    continue;
                }
                edges.push(EdgeDump {
                    from: parent.to_string(),
                    to: node.id.to_string(),
                    primary: idx == 0,
                });
            }
        }

        let (width, height) = layout_bounds(graph.store(), metrics)
            .map(|bounds| (bounds.width(), bounds.height()))
            .unwrap_or((0.0, 0.0));

        LayoutDump {
            grid_step: metrics.grid_step,
            width,
            height,
            nodes,
            edges,
        }
    }
}

pub fn write_layout_dump(path: &Path, graph: &ConversationGraph) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = LayoutDump::from_graph(graph);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}
