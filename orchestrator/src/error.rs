//! Orchestrator-specific error types

use shared::SharedError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Spec discovery failed for {assembly}: {message}")]
    DiscoveryFailed { assembly: String, message: String },

    #[error("Failed to spawn node process {node}: {message}")]
    NodeSpawnFailed { node: String, message: String },

    #[error("Node process {node} timed out after {timeout:?}")]
    NodeTimeout { node: String, timeout: Duration },

    #[error("Ingestion server error: {message}")]
    IngestionError { message: String },

    #[error("File system operation failed: {operation} on {path}: {message}")]
    FileSystemError {
        operation: String,
        path: String,
        message: String,
    },

    #[error("Reporting sink {sink} failed: {message}")]
    SinkError { sink: String, message: String },

    #[error("Configuration error: {field}: {message}")]
    ConfigurationError { field: String, message: String },

    #[error("{component} is no longer running")]
    ActorStopped { component: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn ingestion(message: impl Into<String>) -> Self {
        Self::IngestionError {
            message: message.into(),
        }
    }

    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn file_system(operation: impl Into<String>, path: impl AsRef<std::path::Path>, error: impl std::fmt::Display) -> Self {
        Self::FileSystemError {
            operation: operation.into(),
            path: path.as_ref().display().to_string(),
            message: error.to_string(),
        }
    }

    pub fn sink(sink: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::SinkError {
            sink: sink.into(),
            message: error.to_string(),
        }
    }

    pub fn stopped(component: impl Into<String>) -> Self {
        Self::ActorStopped {
            component: component.into(),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
