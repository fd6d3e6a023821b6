//! End-to-end scenarios
//!
//! Runs the real orchestrator (process catalog, process manager, file system)
//! against a spec assembly executable and describes what each sample spec is
//! expected to produce.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use orchestrator::services::{ProcessSpecCatalog, RealFileSystem, RealProcessManager};
use orchestrator::sinks::JsonStoreSink;
use orchestrator::{FileSystem, Orchestrator, RunReport, RunnerConfig};
use shared::{logging, ProcessId};

/// Per-node ceiling for end-to-end runs
pub const E2E_NODE_TIMEOUT: Duration = Duration::from_secs(60);

/// How a spec should end up in the run tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedOutcome {
    Passed,
    /// Spec failed with this many failed nodes
    Failed { failed_nodes: usize },
    /// Every node reported skipped
    Skipped,
    /// Config construction failed; no node slots at all
    Errored,
}

#[derive(Debug, Clone)]
pub struct Expected {
    pub display_name: String,
    pub outcome: ExpectedOutcome,
}

impl Expected {
    pub fn new(display_name: &str, outcome: ExpectedOutcome) -> Self {
        Self {
            display_name: display_name.to_string(),
            outcome,
        }
    }
}

/// What the sample assembly produces, in discovery order
pub fn sample_expectations() -> Vec<Expected> {
    vec![
        Expected::new("SampleTests.Sample", ExpectedOutcome::Passed),
        Expected::new("SampleTests.Failed", ExpectedOutcome::Failed { failed_nodes: 2 }),
        Expected::new("SampleTests.OneNodeFailed", ExpectedOutcome::Failed { failed_nodes: 1 }),
        Expected::new("SampleTests.Skipped", ExpectedOutcome::Skipped),
        Expected::new("BadConfigTests.BadConfig", ExpectedOutcome::Errored),
    ]
}

/// Run every spec of `assembly`, writing logs and the JSON store under `output`
pub async fn run_assembly(assembly: &str, output: &Path) -> anyhow::Result<RunReport> {
    let config = RunnerConfig::new(assembly, output)
        .with_node_timeout(E2E_NODE_TIMEOUT)
        .with_json_store(true);
    run_with_config(config).await
}

pub async fn run_with_config(config: RunnerConfig) -> anyhow::Result<RunReport> {
    logging::log_startup(ProcessId::current(), &format!("e2e run of {}", config.assembly));

    let file_system: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let process_manager = RealProcessManager::new()
        .with_node_timeout(config.node_timeout)
        .with_kill_grace(config.kill_grace);
    let mut orchestrator = Orchestrator::new(config, ProcessSpecCatalog::new(), process_manager, file_system.clone());
    if orchestrator.config().json_store {
        orchestrator = orchestrator.with_sink(Box::new(JsonStoreSink::new(file_system)));
    }

    Ok(orchestrator.run().await?)
}
