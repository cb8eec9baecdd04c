//! Error types for procpool.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which step of writing the worker entry point failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStage {
    /// Creating or truncating the artifact file.
    Create,
    /// Writing the dependency preamble.
    Preamble,
    /// Copying the bootstrap template.
    Bootstrap,
    /// Appending the task body.
    TaskBody,
    /// Marking the artifact executable.
    Permissions,
    /// Removing the artifact at shutdown.
    Remove,
}

impl fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Create => "create artifact",
            Self::Preamble => "write dependency preamble",
            Self::Bootstrap => "copy bootstrap template",
            Self::TaskBody => "write task body",
            Self::Permissions => "set artifact permissions",
            Self::Remove => "remove artifact",
        };
        f.write_str(stage)
    }
}

/// Main error type for procpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Config(String),

    #[error("Failed to {stage} at {}: {source}", path.display())]
    Artifact {
        stage: ArtifactStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Worker IPC error: {0}")]
    Ipc(String),

    #[error("Worker {worker} could not start task '{task}': {reason}")]
    WorkerBootstrap {
        worker: u32,
        task: String,
        reason: String,
    },

    #[error("Task registry error: {0}")]
    Registry(String),

    #[error("Process pool is already closed")]
    AlreadyClosed,

    #[error("Cannot {operation} on a closed process pool")]
    Closed { operation: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoolError {
    /// Whether this error comes from using a pool after shutdown.
    pub fn is_shutdown_misuse(&self) -> bool {
        matches!(self, Self::AlreadyClosed | Self::Closed { .. })
    }
}

/// Result type alias for procpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_message() {
        let err = PoolError::Config("max_parallel must be at least 1".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Invalid pool configuration"));
        assert!(msg.contains("max_parallel"));
    }

    #[test]
    fn test_artifact_error_names_stage_and_path() {
        let err = PoolError::Artifact {
            stage: ArtifactStage::Bootstrap,
            path: PathBuf::from("/tmp/work/task.sh"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("copy bootstrap template"));
        assert!(msg.contains("/tmp/work/task.sh"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_artifact_stages_are_distinct() {
        let stages = [
            ArtifactStage::Create,
            ArtifactStage::Preamble,
            ArtifactStage::Bootstrap,
            ArtifactStage::TaskBody,
            ArtifactStage::Permissions,
            ArtifactStage::Remove,
        ];
        let names: std::collections::HashSet<String> =
            stages.iter().map(|s| s.to_string()).collect();
        assert_eq!(names.len(), stages.len());
    }

    #[test]
    fn test_shutdown_misuse_classification() {
        assert!(PoolError::AlreadyClosed.is_shutdown_misuse());
        assert!(PoolError::Closed { operation: "run" }.is_shutdown_misuse());
        assert!(!PoolError::Spawn("boom".into()).is_shutdown_misuse());
    }

    #[test]
    fn test_closed_error_names_operation() {
        let err = PoolError::Closed {
            operation: "enqueue",
        };
        assert_eq!(err.to_string(), "Cannot enqueue on a closed process pool");
    }

    #[test]
    fn test_worker_bootstrap_error_message() {
        let err = PoolError::WorkerBootstrap {
            worker: 4242,
            task: "resize".to_string(),
            reason: "exited with code 3".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4242"));
        assert!(msg.contains("resize"));
        assert!(msg.contains("code 3"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: PoolError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: PoolError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
