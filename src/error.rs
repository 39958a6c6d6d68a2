use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("invalid snapshot ({} problem(s)):\n{}", .violations.len(), .violations.join("\n"))]
    InvalidSnapshot { violations: Vec<String> },

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub fn violations(&self) -> &[String] {
        match self {
            GraphError::InvalidSnapshot { violations } => violations,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
