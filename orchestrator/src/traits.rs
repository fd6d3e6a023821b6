//! Trait definitions with mockall annotations for testing
//!
//! Every seam the run loop depends on is a trait here so the orchestrator can
//! be driven entirely by mocks in tests.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::{DiscoveryReport, LogLevel, NodeLaunchArgs, NodeTest, Spec};

use crate::core::results::{FactData, NodeResult, TestRunTree};
use crate::core::timeline::TimelineHandle;
use crate::error::OrchestratorResult;
use crate::services::process_manager::NodeOutcome;

/// Identity of one run, handed to sinks when they open and close
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub run_id: Uuid,
    pub assembly: String,
    pub output_dir: PathBuf,
    pub spec_count: usize,
}

/// Source of the specs an assembly declares
#[mockall::automock]
#[async_trait::async_trait]
pub trait SpecCatalog: Send + Sync {
    /// Enumerate every multi-node spec of `assembly` with its roles
    ///
    /// # Returns
    /// The discovered specs plus per-spec discovery errors. Only a failure to
    /// inspect the assembly at all is returned as `Err`.
    async fn discover(&self, assembly: &str) -> OrchestratorResult<DiscoveryReport>;
}

/// Node process supervision
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn one node process and supervise it until it exits, times out or
    /// is cancelled
    ///
    /// # Parameters
    /// - `node`: the spec/role/index triple this process runs
    /// - `args`: launch arguments rendered onto the command line
    /// - `timeline`: collector receiving every captured output line
    /// - `cancel`: run-level cancellation scope
    ///
    /// # Returns
    /// The node outcome; `Err` only when the process could not be started
    async fn run_node(
        &self,
        node: &NodeTest,
        args: NodeLaunchArgs,
        timeline: TimelineHandle,
        cancel: CancellationToken,
    ) -> OrchestratorResult<NodeOutcome>;
}

/// File system abstraction for dependency injection
#[mockall::automock]
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> OrchestratorResult<()>;

    /// Create or truncate `path` and write `contents`, retrying transient failures
    async fn write_file(&self, path: &Path, contents: &str) -> OrchestratorResult<()>;

    async fn read_file(&self, path: &Path) -> OrchestratorResult<String>;

    /// Recursively copy a directory, replacing files already at the destination
    async fn copy_dir(&self, from: &Path, to: &Path) -> OrchestratorResult<()>;

    /// Remove everything inside `path`, keeping the directory itself
    async fn clear_dir(&self, path: &Path) -> OrchestratorResult<()>;
}

/// Destination of logical messages reassembled by the ingestion server
#[mockall::automock]
#[async_trait::async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, message: String);
}

/// A pluggable consumer of run, spec and node events
///
/// Sinks may see partial data: a spec whose configuration failed ends with no
/// node results at all. Errors returned here are logged by the coordinator and
/// never stop the run.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ReportingSink: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> String;

    async fn open(&mut self, run: &RunContext) -> anyhow::Result<()>;

    async fn begin_spec(&mut self, spec: &Spec) -> anyhow::Result<()>;

    /// A node slot changed (passed, failed or skipped)
    async fn node_result(&mut self, spec: &Spec, result: &NodeResult) -> anyhow::Result<()>;

    /// The spec finished; `fact` carries the final verdict and its timeline
    async fn end_spec(&mut self, fact: &FactData) -> anyhow::Result<()>;

    async fn log_runner_message(&mut self, message: &str, source: &str, level: LogLevel) -> anyhow::Result<()>;

    /// A message no classifier recognised
    async fn offer(&mut self, message: &str) -> anyhow::Result<()>;

    /// Exit code this sink asks for, if it has an opinion
    fn exit_code(&self, tree: &TestRunTree) -> Option<i32>;

    /// Flush and release resources; the run waits for every sink to return
    async fn close(&mut self, run: &RunContext, tree: &TestRunTree) -> anyhow::Result<()>;
}
