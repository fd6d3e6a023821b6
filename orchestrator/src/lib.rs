//! Multi-node test orchestration and log aggregation
//!
//! Discovers the multi-node specs of an assembly, runs every spec as a set
//! of cooperating node processes, collects their output and TCP log streams
//! into one timeline per spec, and reports results through pluggable sinks.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod sinks;
pub mod traits;

// Re-export commonly used types
pub use config::{ReporterKind, RunnerConfig};
pub use core::{CoordinatorHandle, FactData, NodeStatus, RunReport, SpecLog, TestRunTree, TimelineHandle};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use traits::{FileSystem, MessageRouter, ProcessManager, ReportingSink, RunContext, SpecCatalog};
