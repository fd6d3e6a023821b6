//! Test helpers and builder patterns for orchestrator tests
//!
//! `ScriptedProcessManager` plays the part of real node processes: it writes
//! wire lines to the ingestion server and output lines to the timeline, then
//! reports an exit code chosen by the test.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use orchestrator::core::results::{FactData, NodeResult, TestRunTree};
use orchestrator::services::process_manager::{NodeExit, NodeOutcome};
use orchestrator::services::RealFileSystem;
use orchestrator::traits::{MockProcessManager, MockSpecCatalog};
use orchestrator::{
    FileSystem, Orchestrator, OrchestratorResult, ProcessManager, ReportingSink, RunContext, RunnerConfig,
    TimelineHandle,
};
use shared::protocol::{self, FailureDetail};
use shared::{DiscoveryReport, LogLevel, NodeLaunchArgs, NodeTest, Spec};

/// What a scripted node does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    /// Reports PASS and exits 0
    Pass,
    /// Reports FAIL and exits 1
    Fail,
    /// Reports FAIL over TCP only and still exits 0
    FailOverTcpOnly,
    /// Runs until the run is cancelled
    Hang,
}

type Script = Arc<dyn Fn(&NodeTest) -> NodeBehavior + Send + Sync>;

pub struct ScriptedProcessManager {
    script: Script,
    launched: Arc<Mutex<Vec<NodeLaunchArgs>>>,
}

impl ScriptedProcessManager {
    pub fn new(script: impl Fn(&NodeTest) -> NodeBehavior + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            launched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of every launch, in launch order
    pub fn launched(&self) -> Arc<Mutex<Vec<NodeLaunchArgs>>> {
        self.launched.clone()
    }
}

#[async_trait]
impl ProcessManager for ScriptedProcessManager {
    async fn run_node(
        &self,
        node: &NodeTest,
        args: NodeLaunchArgs,
        timeline: TimelineHandle,
        cancel: CancellationToken,
    ) -> OrchestratorResult<NodeOutcome> {
        let info = node.node_info();
        self.launched.lock().unwrap().push(args.clone());
        let behavior = (self.script)(node);
        let display = node.spec.display_name();

        timeline.record(&info, &format!("{info} starting as {behavior:?}")).await;

        let failure = FailureDetail::new("Error", format!("node {} gave up", node.index));
        let line = match behavior {
            NodeBehavior::Pass => protocol::node_pass(node.index, &node.role, &display),
            NodeBehavior::Fail | NodeBehavior::FailOverTcpOnly => {
                protocol::node_fail(node.index, &node.role, &display, &[failure.clone()])
            }
            NodeBehavior::Hang => protocol::node_fragment(node.index, &node.role, chrono::Utc::now(), "waiting"),
        };
        let mut stream = TcpStream::connect((args.listen_address.as_str(), args.listen_port)).await?;
        stream.write_all(format!("{line}\n").as_bytes()).await?;
        stream.shutdown().await?;
        drop(stream);

        let (exit, failures) = match behavior {
            NodeBehavior::Pass | NodeBehavior::FailOverTcpOnly => (NodeExit::Exited(Some(0)), vec![]),
            NodeBehavior::Fail => (NodeExit::Exited(Some(1)), vec![failure]),
            NodeBehavior::Hang => {
                cancel.cancelled().await;
                (NodeExit::Cancelled, vec![])
            }
        };

        Ok(NodeOutcome {
            node: info,
            exit,
            elapsed: Duration::from_millis(5),
            failures,
        })
    }
}

/// Sink that records every event it receives as a line of text
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ReportingSink for RecordingSink {
    fn name(&self) -> String {
        "recording".to_string()
    }

    async fn open(&mut self, run: &RunContext) -> anyhow::Result<()> {
        self.push(format!("open {}", run.spec_count));
        Ok(())
    }

    async fn begin_spec(&mut self, spec: &Spec) -> anyhow::Result<()> {
        self.push(format!("begin {}", spec.display_name()));
        Ok(())
    }

    async fn node_result(&mut self, spec: &Spec, result: &NodeResult) -> anyhow::Result<()> {
        self.push(format!("node {} {} {:?}", spec.display_name(), result.index, result.status));
        Ok(())
    }

    async fn end_spec(&mut self, fact: &FactData) -> anyhow::Result<()> {
        self.push(format!("end {} passed={}", fact.spec.display_name(), fact.passed));
        Ok(())
    }

    async fn log_runner_message(&mut self, message: &str, source: &str, level: LogLevel) -> anyhow::Result<()> {
        self.push(format!("runner {level} {source} {message}"));
        Ok(())
    }

    async fn offer(&mut self, message: &str) -> anyhow::Result<()> {
        self.push(format!("offer {message}"));
        Ok(())
    }

    fn exit_code(&self, _tree: &TestRunTree) -> Option<i32> {
        None
    }

    async fn close(&mut self, _run: &RunContext, _tree: &TestRunTree) -> anyhow::Result<()> {
        self.push("close".to_string());
        Ok(())
    }
}

/// Builder pattern for creating test orchestrators with sensible defaults
pub struct OrchestratorBuilder {
    output: TempDir,
    catalog: MockSpecCatalog,
    configure: Vec<Box<dyn FnOnce(RunnerConfig) -> RunnerConfig>>,
    sink: RecordingSink,
}

impl OrchestratorBuilder {
    pub fn new(report: DiscoveryReport) -> Self {
        let mut catalog = MockSpecCatalog::new();
        catalog.expect_discover().returning(move |_| Ok(report.clone()));

        Self {
            output: TempDir::new().unwrap(),
            catalog,
            configure: Vec::new(),
            sink: RecordingSink::default(),
        }
    }

    /// Use a catalog mock configured by the test
    pub fn with_catalog(mut self, catalog: MockSpecCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_config(mut self, configure: impl FnOnce(RunnerConfig) -> RunnerConfig + 'static) -> Self {
        self.configure.push(Box::new(configure));
        self
    }

    pub fn sink(&self) -> RecordingSink {
        self.sink.clone()
    }

    pub fn output(&self) -> &Path {
        self.output.path()
    }

    fn config(&mut self) -> RunnerConfig {
        let mut config = RunnerConfig::new(super::TestFixtures::ASSEMBLY, self.output.path());
        for configure in self.configure.drain(..) {
            config = configure(config);
        }
        config
    }

    /// Build with any process manager; the output directory lives as long as the returned guard
    pub fn build<P>(mut self, process_manager: P) -> (Orchestrator<MockSpecCatalog, P>, TempDir)
    where
        P: ProcessManager + 'static,
    {
        let config = self.config();
        let file_system: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
        let orchestrator = Orchestrator::new(config, self.catalog, process_manager, file_system)
            .with_sink(Box::new(self.sink.clone()));
        (orchestrator, self.output)
    }

    pub fn build_with_mock(
        self,
        setup: impl FnOnce(&mut MockProcessManager),
    ) -> (Orchestrator<MockSpecCatalog, MockProcessManager>, TempDir) {
        let mut process_manager = MockProcessManager::new();
        setup(&mut process_manager);
        self.build(process_manager)
    }
}
