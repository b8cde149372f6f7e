// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("edge {0} -> {0} is a self loop")]
    SelfLoop(String),

    #[error("edge {from} -> {to} references a node that is not in the DAG")]
    MissingNode { from: String, to: String },

    #[error("edge {from} -> {to} would create a cycle")]
    WouldCycle { from: String, to: String },

    #[error("Cycle detected in DAG")]
    CycleDetected,

    #[error("task execution time out after {0:?}")]
    Timeout(Duration),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("lock {0} is not held by this session")]
    LockNotHeld(String),

    #[error("Invalid dependent configuration: {0}")]
    InvalidDependent(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        let err = DagflowError::WouldCycle {
            from: "b".into(),
            to: "a".into(),
        };
        assert_eq!(err.to_string(), "edge b -> a would create a cycle");
        assert_eq!(
            DagflowError::Timeout(Duration::from_secs(3)).to_string(),
            "task execution time out after 3s"
        );
    }
}
