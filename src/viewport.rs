use crate::config::LayoutMetrics;
use crate::layout::{PixelRect, node_rect};
use crate::model::NodeId;
use crate::store::NodeStore;
use crate::visibility::CollapseSet;

/// Canvas transform: screen = canvas * scale + offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSize {
    pub width: f64,
    pub height: f64,
}

/// Visible canvas-pixel rectangle grown by `buffer` on every side.
pub fn visible_rect(camera: Camera, viewport: ViewportSize, buffer: f64) -> Option<PixelRect> {
    if !camera.scale.is_finite() || camera.scale <= 0.0 {
        return None;
    }
    Some(PixelRect {
        min_x: (0.0 - camera.offset_x) / camera.scale - buffer,
        min_y: (0.0 - camera.offset_y) / camera.scale - buffer,
        max_x: (viewport.width - camera.offset_x) / camera.scale + buffer,
        max_y: (viewport.height - camera.offset_y) / camera.scale + buffer,
    })
}

/// Ids of nodes intersecting the buffered viewport, in node-list order. Thought nodes
/// and nodes under a collapsed ancestor are never returned.
pub fn visible_node_ids(
    store: &NodeStore,
    collapse: &CollapseSet,
    metrics: &LayoutMetrics,
    camera: Camera,
    viewport: ViewportSize,
    buffer: f64,
) -> Vec<NodeId> {
    let Some(view) = visible_rect(camera, viewport, buffer) else {
        tracing::warn!(scale = camera.scale, "ignoring viewport query with unusable scale");
        return Vec::new();
    };
    let mut hidden = collapse.hidden_memo(store);
    store
        .nodes()
        .iter()
        .filter(|node| !node.is_thought())
        .filter(|node| node_rect(node, metrics).intersects(&view))
        .filter(|node| !hidden.is_hidden(node.id.as_str()))
        .map(|node| node.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewNode, THOUGHT_TYPE};

    fn metrics() -> LayoutMetrics {
        LayoutMetrics {
            grid_step: 10.0,
            node_width: 10.0,
            default_height_px: 50.0,
            gap_x: 1.0,
            gap_y: 1.0,
        }
    }

    fn store_with(nodes: &[(&str, f64, f64)]) -> NodeStore {
        let mut store = NodeStore::new();
        for (id, x, y) in nodes {
            store.add(NewNode::new("user", *id).with_id(*id).with_position(*x, *y).into_node());
        }
        store
    }

    fn viewport() -> ViewportSize {
        ViewportSize {
            width: 800.0,
            height: 600.0,
        }
    }

    #[test]
    fn rect_accounts_for_scale_and_offset() {
        let camera = Camera {
            scale: 2.0,
            offset_x: 100.0,
            offset_y: -50.0,
        };
        let rect = visible_rect(camera, viewport(), 10.0).unwrap();
        assert_eq!(rect.min_x, -60.0);
        assert_eq!(rect.max_x, 360.0);
        assert_eq!(rect.min_y, 15.0);
        assert_eq!(rect.max_y, 335.0);
    }

    #[test]
    fn excludes_nodes_left_of_view_and_keeps_straddlers() {
        // Node boxes are 100px wide; view starts at x = 0.
        let store = store_with(&[("left", -11.0, 0.0), ("straddle", -5.0, 0.0), ("touch", -10.0, 0.0)]);
        let ids = visible_node_ids(
            &store,
            &CollapseSet::default(),
            &metrics(),
            Camera::default(),
            viewport(),
            0.0,
        );
        assert_eq!(ids, vec![NodeId::from("straddle"), NodeId::from("touch")]);
    }

    #[test]
    fn buffer_widens_the_view() {
        let store = store_with(&[("left", -11.0, 0.0)]);
        let ids = visible_node_ids(
            &store,
            &CollapseSet::default(),
            &metrics(),
            Camera::default(),
            viewport(),
            20.0,
        );
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn thoughts_and_collapsed_descendants_are_excluded() {
        let mut store = store_with(&[("r", 0.0, 0.0)]);
        store.add(NewNode::new("user", "c").with_id("c").with_parent("r").into_node());
        store.add(
            NewNode::new("assistant", "t")
                .with_id("t")
                .with_parent("r")
                .with_type(THOUGHT_TYPE)
                .into_node(),
        );
        let mut collapse = CollapseSet::default();
        let ids = visible_node_ids(&store, &collapse, &metrics(), Camera::default(), viewport(), 0.0);
        assert_eq!(ids, vec![NodeId::from("r"), NodeId::from("c")]);
        collapse.set(&NodeId::from("r"), true);
        let ids = visible_node_ids(&store, &collapse, &metrics(), Camera::default(), viewport(), 0.0);
        assert_eq!(ids, vec![NodeId::from("r")]);
    }

    #[test]
    fn unusable_scale_yields_nothing() {
        let store = store_with(&[("a", 0.0, 0.0)]);
        let camera = Camera {
            scale: 0.0,
            ..Camera::default()
        };
        assert!(
            visible_node_ids(&store, &CollapseSet::default(), &metrics(), camera, viewport(), 0.0)
                .is_empty()
        );
    }
}
