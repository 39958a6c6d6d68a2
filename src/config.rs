use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Pixels per grid unit.
    pub grid_step: f64,
    /// Rendered node width in pixels.
    pub node_width: f64,
    /// Height in pixels assumed for nodes that were never measured.
    pub default_node_height: f64,
    /// Grid units between sibling subtrees.
    pub gap_x: f64,
    /// Grid units between the bottom of a parent and its child row.
    pub gap_y: f64,
    pub undo_window_ms: u64,
    /// Pixel margin added around the viewport when culling.
    pub viewport_buffer: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_step: 20.0,
            node_width: 400.0,
            default_node_height: 120.0,
            gap_x: 2.0,
            gap_y: 3.0,
            undo_window_ms: 30_000,
            viewport_buffer: 200.0,
        }
    }
}

impl EngineConfig {
    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn layout_metrics(&self) -> LayoutMetrics {
        let grid_step = if self.grid_step > 0.0 {
            self.grid_step
        } else {
            EngineConfig::default().grid_step
        };
        LayoutMetrics {
            grid_step,
            node_width: self.node_width / grid_step,
            default_height_px: self.default_node_height,
            gap_x: self.gap_x,
            gap_y: self.gap_y,
        }
    }
}

/// Layout constants in grid units, derived from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutMetrics {
    pub grid_step: f64,
    pub node_width: f64,
    pub default_height_px: f64,
    pub gap_x: f64,
    pub gap_y: f64,
}

impl LayoutMetrics {
    pub fn height_in_grid(&self, height_px: Option<f64>) -> f64 {
        height_px.unwrap_or(self.default_height_px) / self.grid_step
    }

    pub fn px_to_grid(&self, px: f64) -> f64 {
        px / self.grid_step
    }
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        EngineConfig::default().layout_metrics()
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    grid_step: Option<f64>,
    node_width: Option<f64>,
    default_node_height: Option<f64>,
    gap_x: Option<f64>,
    gap_y: Option<f64>,
    undo_window_ms: Option<u64>,
    viewport_buffer: Option<f64>,
    layout: Option<LayoutSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LayoutSection {
    node_spacing: Option<f64>,
    rank_spacing: Option<f64>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> anyhow::Result<EngineConfig> {
    let parsed: ConfigFile = serde_json::from_str(contents)?;
    let mut config = EngineConfig::default();

    if let Some(v) = parsed.grid_step {
        if v <= 0.0 || !v.is_finite() {
            return Err(anyhow::anyhow!("gridStep must be a positive number, got {}", v));
        }
        config.grid_step = v;
    }
    if let Some(v) = parsed.node_width {
        config.node_width = v;
    }
    if let Some(v) = parsed.default_node_height {
        config.default_node_height = v;
    }
    if let Some(v) = parsed.gap_x {
        config.gap_x = v;
    }
    if let Some(v) = parsed.gap_y {
        config.gap_y = v;
    }
    // Mermaid-style spacing aliases, in pixels.
    if let Some(layout) = parsed.layout {
        if let Some(v) = layout.node_spacing {
            config.gap_x = v / config.grid_step;
        }
        if let Some(v) = layout.rank_spacing {
            config.gap_y = v / config.grid_step;
        }
    }
    if let Some(v) = parsed.undo_window_ms {
        config.undo_window_ms = v;
    }
    if let Some(v) = parsed.viewport_buffer {
        config.viewport_buffer = v;
    }
    Ok(config)
}
