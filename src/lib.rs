#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod layout;
pub mod layout_dump;
pub mod model;
pub mod search;
pub mod snapshot;
pub mod store;
pub mod undo;
pub mod viewport;
pub mod visibility;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{EngineConfig, LayoutMetrics, load_config};
pub use engine::{AddOptions, ConversationGraph, GraphChange, ListenerId};
pub use error::{GraphError, Result};
pub use model::{NewNode, Node, NodeId, NodeUpdate, Position};
pub use snapshot::{Snapshot, SnapshotNode};
pub use viewport::{Camera, ViewportSize};
