//! Error types for KVis Core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvisError {
    #[error("Capacity exceeded: requested {requested} replicas on one port, capacity is {capacity}")]
    CapacityExceeded { requested: u32, capacity: u32 },

    #[error("Invalid replica count: {0}")]
    InvalidReplicaCount(u32),

    #[error("Ports exhausted: no port with spare capacity at or above {0}")]
    PortsExhausted(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Status error: {status} returned for {path}")]
    Status { status: u16, path: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out after {after:?}: {path}")]
    Timeout { path: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl KvisError {
    /// Timeouts are reported the same way as transport failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, KvisError::Transport(_) | KvisError::Timeout { .. })
    }

    /// Allocation failures the caller must reject the workload for.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            KvisError::CapacityExceeded { .. }
                | KvisError::InvalidReplicaCount(_)
                | KvisError::PortsExhausted(_)
        )
    }
}

impl From<reqwest::Error> for KvisError {
    fn from(err: reqwest::Error) -> Self {
        KvisError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KvisError>;
