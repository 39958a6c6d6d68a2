use super::*;

fn layout_child_ids<'a>(store: &'a NodeStore, parent_id: &str) -> Vec<&'a NodeId> {
    store
        .child_ids(Some(parent_id))
        .iter()
        .filter(|id| {
            store
                .get(id.as_str())
                .is_some_and(|child| !child.is_thought())
        })
        .collect()
}

fn combine_extent(
    store: &NodeStore,
    node_id: &str,
    metrics: &LayoutMetrics,
    cache: &ExtentCache,
) -> SubtreeExtent {
    let own_height = store
        .get(node_id)
        .map(|node| metrics.height_in_grid(node.position.height))
        .unwrap_or(0.0);
    let mut width = 0.0;
    let mut tallest: f64 = 0.0;
    let mut count = 0usize;
    for child in layout_child_ids(store, node_id) {
        // Children still being expanded sit on a malformed cycle and are skipped.
        let Some(extent) = cache.get(child.as_str()) else {
            continue;
        };
        width += extent.width;
        tallest = tallest.max(extent.height);
        count += 1;
    }
    if count == 0 {
        return SubtreeExtent {
            width: metrics.node_width,
            height: own_height,
        };
    }
    width += metrics.gap_x * (count as f64 - 1.0);
    SubtreeExtent {
        width,
        height: own_height + metrics.gap_y + tallest,
    }
}

/// Bottom-up pass filling `cache` for `root_id` and every layout descendant.
pub(super) fn measure_subtree(
    store: &NodeStore,
    root_id: &str,
    metrics: &LayoutMetrics,
    cache: &mut ExtentCache,
) {
    let Some(root) = store.get(root_id) else {
        return;
    };
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<(&NodeId, bool)> = vec![(&root.id, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            let extent = combine_extent(store, id.as_str(), metrics, cache);
            cache.insert(id.clone(), extent);
            continue;
        }
        if !seen.insert(id.as_str()) {
            continue;
        }
        stack.push((id, true));
        for child in layout_child_ids(store, id.as_str()) {
            if !seen.contains(child.as_str()) {
                stack.push((child, false));
            }
        }
    }
}

/// Top-down pass centering each row of children under its parent.
///
/// Anchors carry unrounded coordinates down the tree; only stored positions are
/// rounded, so deep chains do not accumulate rounding error.
pub(super) fn place_subtree(
    store: &mut NodeStore,
    root_id: &str,
    metrics: &LayoutMetrics,
    cache: &ExtentCache,
) -> usize {
    let Some(root) = store.get(root_id) else {
        return 0;
    };
    let mut placed = 0usize;
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(NodeId, f64, f64)> =
        vec![(root.id.clone(), root.position.x, root.position.y)];

    while let Some((parent_id, anchor_x, anchor_y)) = stack.pop() {
        if !seen.insert(parent_id.clone()) {
            continue;
        }
        let Some(parent) = store.get(parent_id.as_str()) else {
            continue;
        };
        let parent_height = metrics.height_in_grid(parent.position.height);
        let row: Vec<(NodeId, f64)> = layout_child_ids(store, parent_id.as_str())
            .into_iter()
            .filter(|child| !seen.contains(child.as_str()))
            .map(|child| {
                let width = cache
                    .get(child.as_str())
                    .map(|extent| extent.width)
                    .unwrap_or(metrics.node_width);
                (child.clone(), width)
            })
            .collect();
        if row.is_empty() {
            continue;
        }

        let total: f64 =
            row.iter().map(|(_, width)| width).sum::<f64>() + metrics.gap_x * (row.len() as f64 - 1.0);
        let parent_center = anchor_x + metrics.node_width / 2.0;
        let row_y = anchor_y + parent_height + metrics.gap_y;
        let mut cursor = parent_center - total / 2.0;

        for (child_id, width) in row {
            let target_x = cursor + width / 2.0 - metrics.node_width / 2.0;
            cursor += width + metrics.gap_x;
            let Some(child) = store.get_mut(child_id.as_str()) else {
                continue;
            };
            let anchor = if child.position.manual {
                (child.position.x, child.position.y)
            } else {
                child.position.x = target_x.round();
                child.position.y = row_y.round();
                placed += 1;
                tracing::trace!(
                    node = %child_id,
                    x = child.position.x,
                    y = child.position.y,
                    "placed node"
                );
                (target_x, row_y)
            };
            stack.push((child_id, anchor.0, anchor.1));
        }
    }
    placed
}
