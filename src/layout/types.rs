use std::collections::HashMap;

use crate::model::NodeId;

/// Footprint of a node and its non-thought descendants, in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SubtreeExtent {
    pub width: f64,
    pub height: f64,
}

/// Scratch cache filled by one measuring pass. Never kept across calls.
pub type ExtentCache = HashMap<NodeId, SubtreeExtent>;

/// Axis-aligned box in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl PixelRect {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Overlap test where touching edges count as overlapping.
    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn union(&self, other: &PixelRect) -> PixelRect {
        PixelRect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}
