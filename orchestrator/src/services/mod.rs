//! Service implementations
//!
//! This module contains real implementations of the service traits plus the
//! TCP ingestion server. These are the production implementations that handle
//! actual I/O.

pub mod catalog;
pub mod file_system;
pub mod ingestion;
pub mod process_manager;
pub mod process_output_handler;

// Re-export all service implementations
pub use catalog::ProcessSpecCatalog;
pub use file_system::RealFileSystem;
pub use ingestion::{IngestionHandle, IngestionServer};
pub use process_manager::{NodeExit, NodeOutcome, RealProcessManager};
