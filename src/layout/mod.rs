mod tree;
pub(crate) mod types;
pub use types::*;
use tree::*;

use crate::config::LayoutMetrics;
use crate::model::NodeId;
use crate::store::NodeStore;
use std::collections::HashSet;

/// Targeted layout: re-places the subtree below `parent_id`, measuring only that
/// subtree. Returns the number of nodes whose position was assigned.
pub fn layout_children(store: &mut NodeStore, parent_id: &str, metrics: &LayoutMetrics) -> usize {
    if !store.contains(parent_id) {
        return 0;
    }
    let mut cache = ExtentCache::new();
    measure_subtree(store, parent_id, metrics, &mut cache);
    let placed = place_subtree(store, parent_id, metrics, &cache);
    tracing::trace!(parent = parent_id, placed, "targeted layout");
    placed
}

/// Global layout: one bottom-up measuring pass per root, then one top-down placement
/// pass reusing the shared cache.
pub fn flush_layout_from_roots(store: &mut NodeStore, metrics: &LayoutMetrics) -> usize {
    let roots = store.layout_roots();
    let cache = measure_roots(store, &roots, metrics);
    let mut placed = 0;
    for root in &roots {
        placed += place_subtree(store, root.as_str(), metrics, &cache);
    }
    tracing::debug!(roots = roots.len(), placed, "global layout flushed");
    placed
}

fn measure_roots(store: &NodeStore, roots: &[NodeId], metrics: &LayoutMetrics) -> ExtentCache {
    let mut cache = ExtentCache::with_capacity(store.len());
    for root in roots {
        if store.get(root.as_str()).is_some_and(|node| node.is_thought()) {
            continue;
        }
        measure_subtree(store, root.as_str(), metrics, &mut cache);
    }
    cache
}

/// Pixel-space box of a node as the culler and renderers see it.
pub fn node_rect(node: &crate::model::Node, metrics: &LayoutMetrics) -> PixelRect {
    let node_width_px = metrics.node_width * metrics.grid_step;
    let min_x = node.position.x * metrics.grid_step;
    let min_y = node.position.y * metrics.grid_step;
    PixelRect {
        min_x,
        min_y,
        max_x: min_x + node_width_px,
        max_y: min_y + node.position.height.unwrap_or(metrics.default_height_px),
    }
}

/// Pixel bounding box over every non-thought node, or `None` for an empty graph.
pub fn layout_bounds(store: &NodeStore, metrics: &LayoutMetrics) -> Option<PixelRect> {
    store
        .nodes()
        .iter()
        .filter(|node| !node.is_thought())
        .map(|node| node_rect(node, metrics))
        .reduce(|acc, rect| acc.union(&rect))
}
