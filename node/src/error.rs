//! Node-side error types

use shared::DiscoveryErrorKind;
use thiserror::Error;

/// Result type for node host operations
pub type NodeResult<T> = Result<T, NodeError>;

/// Failures while resolving a spec out of the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("No constructor parameter deriving from the multi-node config base in the inheritance chain of {type_name}")]
    ConfigurationNotFound { type_name: String },

    #[error("Config {config_type} could not be constructed: {message}")]
    ConfigurationConstruction { config_type: String, message: String },

    #[error("Type reference #{index} is not part of this registry")]
    InvalidTypeRef { index: usize },

    #[error("Spec {type_name}.{method_name} is not declared on a concrete type")]
    SpecNotFound { type_name: String, method_name: String },
}

impl CatalogError {
    pub fn kind(&self) -> DiscoveryErrorKind {
        match self {
            CatalogError::ConfigurationNotFound { .. } => DiscoveryErrorKind::ConfigurationNotFound,
            CatalogError::ConfigurationConstruction { .. } => DiscoveryErrorKind::ConfigurationConstruction,
            _ => DiscoveryErrorKind::Inspection,
        }
    }
}

/// Node host error types
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid node arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Role {role} is not declared by {spec}")]
    UnknownRole { spec: String, role: String },

    #[error("Runner connection error: {message}")]
    ConnectionError { message: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] shared::SharedError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NodeError {
    pub fn arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }
}
