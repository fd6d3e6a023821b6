//! Main orchestrator implementation
//!
//! Runs every discovered spec of one assembly, strictly one after another,
//! with all nodes of a spec in parallel. The orchestrator owns the run-level
//! cancellation scope and hands back a [`RunReport`] instead of exiting.

use futures_util::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::protocol::FailureDetail;
use shared::{
    logging, process_debug, process_error, process_info, process_warn, LogLevel, NodeLaunchArgs, NodeTest, ProcessId,
    Spec,
};

use crate::config::{sanitize_file_name, RunnerConfig};
use crate::core::coordinator::CoordinatorHandle;
use crate::core::results::{NodeCompletion, RunReport, SpecLog};
use crate::core::timeline::TimelineHandle;
use crate::error::OrchestratorResult;
use crate::services::ingestion::{IngestionHandle, IngestionServer};
use crate::traits::{FileSystem, ProcessManager, ReportingSink, RunContext, SpecCatalog};

/// How long to wait for node connections to drain after the last node exits
const INGESTION_IDLE_LIMIT: Duration = Duration::from_secs(10);

/// Main orchestrator that runs the specs of one assembly
pub struct Orchestrator<C, P>
where
    C: SpecCatalog + 'static,
    P: ProcessManager + 'static,
{
    config: RunnerConfig,

    /// Injected services
    catalog: C,
    process_manager: P,
    file_system: Arc<dyn FileSystem>,

    sinks: Vec<Box<dyn ReportingSink>>,
    cancel: CancellationToken,
}

/// Per-run plumbing shared by every spec
struct RunChannels {
    coordinator: CoordinatorHandle,
    ingestion: IngestionHandle,
    bound: SocketAddr,
}

impl<C, P> Orchestrator<C, P>
where
    C: SpecCatalog + 'static,
    P: ProcessManager + 'static,
{
    /// Create new orchestrator with injected dependencies
    pub fn new(config: RunnerConfig, catalog: C, process_manager: P, file_system: Arc<dyn FileSystem>) -> Self {
        Self {
            config,
            catalog,
            process_manager,
            file_system,
            sinks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportingSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Token that cancels the whole run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Discover, run and report every spec; the report carries the exit code
    pub async fn run(mut self) -> OrchestratorResult<RunReport> {
        self.config.validate()?;
        self.prepare_output().await?;

        let discovery = self.catalog.discover(&self.config.assembly).await?;
        let total = discovery.specs.len();
        let specs: Vec<Spec> = discovery
            .specs
            .into_iter()
            .filter(|spec| self.config.matches_filter(&spec.display_name()))
            .collect();
        if specs.len() < total {
            process_info!(
                ProcessId::current(),
                "🔎 Filter kept {} of {} specs",
                specs.len(),
                total
            );
        }

        let run = RunContext {
            run_id: Uuid::new_v4(),
            assembly: self.config.assembly.clone(),
            output_dir: self.config.output_dir.clone(),
            spec_count: specs.len(),
        };
        let (coordinator, _coordinator_task) = CoordinatorHandle::spawn(run, std::mem::take(&mut self.sinks));
        coordinator.open().await?;

        let ingestion = IngestionServer::spawn(self.config.listen_address.clone(), Arc::new(coordinator.clone()));
        let bound = match ingestion.bound_addr().await {
            Ok(bound) => bound,
            Err(e) => {
                logging::log_error(ProcessId::current(), "Binding the ingestion listener", &e);
                coordinator.close_all_sinks().await?;
                return Err(e);
            }
        };
        process_info!(ProcessId::current(), "📡 Listening for node logs on {}", bound);

        for error in &discovery.errors {
            coordinator
                .runner_message(LogLevel::Error, "discovery", error.to_string())
                .await?;
        }

        let channels = RunChannels {
            coordinator,
            ingestion,
            bound,
        };
        for spec in specs {
            if self.cancel.is_cancelled() {
                process_warn!(ProcessId::current(), "🛑 Run cancelled, not starting {}", spec.display_name());
                break;
            }
            self.run_spec(spec, &channels).await?;
        }

        let report = channels.coordinator.close_all_sinks().await?;
        channels.ingestion.unbind().await;

        logging::log_success(
            ProcessId::current(),
            &format!(
                "Run finished: {} passed, {} failed, {} skipped (exit code {})",
                report.tree.passed_count(),
                report.tree.failed_count(),
                report.tree.skipped_count(),
                report.exit_code
            ),
        );
        Ok(report)
    }

    async fn prepare_output(&self) -> OrchestratorResult<()> {
        self.file_system.create_dir_all(&self.config.output_dir).await?;
        if self.config.clear_output {
            process_debug!(ProcessId::current(), "🧹 Clearing {}", self.config.output_dir.display());
            self.file_system.clear_dir(&self.config.output_dir).await?;
        }
        Ok(())
    }

    fn launch_args(&self, spec: &Spec, node: &NodeTest, bound: SocketAddr) -> NodeLaunchArgs {
        let listen_address = if bound.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            bound.ip().to_string()
        };
        NodeLaunchArgs {
            assembly: self.config.assembly.clone(),
            spec_type: spec.type_name.clone(),
            spec_method: spec.method_name.clone(),
            node_count: spec.node_count(),
            server_host: self.config.server_host.clone(),
            node_host: self.config.node_host.clone(),
            node_index: node.process_index(),
            role: node.role.to_string(),
            listen_address,
            listen_port: bound.port(),
            log_level: self.config.log_level.clone(),
        }
    }

    async fn run_spec(&self, spec: Spec, channels: &RunChannels) -> OrchestratorResult<()> {
        let display_name = spec.display_name();
        let coordinator = &channels.coordinator;

        if spec.is_skipped() {
            let fact = coordinator.skip_spec(spec).await?;
            process_info!(
                ProcessId::current(),
                "⏭️ Skipped {} ({})",
                display_name,
                fact.skip_reason.unwrap_or_default()
            );
            return Ok(());
        }

        process_info!(ProcessId::current(), "🚀 Running {} on {} nodes", display_name, spec.node_count());
        let timeline = TimelineHandle::spawn(display_name.clone(), self.file_system.clone());
        coordinator.begin_spec(spec.clone(), Some(timeline.clone())).await?;

        let nodes = spec.node_tests();
        let runs = nodes.iter().map(|node| {
            let args = self.launch_args(&spec, node, channels.bound);
            self.process_manager
                .run_node(node, args, timeline.clone(), self.cancel.child_token())
        });
        let outcomes = join_all(runs).await;

        for (node, outcome) in nodes.iter().zip(outcomes) {
            let completion = match outcome {
                Ok(outcome) => outcome.completion(),
                Err(e) => {
                    process_error!(ProcessId::current(), "❌ {}: {}", node.node_info(), e);
                    let message = e.to_string();
                    let failure = FailureDetail::new("NodeSpawnFailed", message.clone());
                    NodeCompletion::failure(node.index, node.role.clone(), message, vec![failure])
                }
            };
            coordinator.node_completed(completion).await?;
        }

        if !channels.ingestion.wait_idle(INGESTION_IDLE_LIMIT).await {
            process_warn!(
                ProcessId::current(),
                "⚠️ Node connections still open {:?} after {} ended",
                INGESTION_IDLE_LIMIT,
                display_name
            );
        }

        let log = match timeline.spec_log().await {
            Ok(log) => log,
            Err(e) => {
                logging::log_error(ProcessId::current(), "Collecting the spec timeline", &e);
                SpecLog::empty(display_name.clone())
            }
        };

        let spec_dir = self.config.spec_dir(&display_name);
        if let Err(e) = timeline.dump_to_file(&spec_dir).await {
            logging::log_error(ProcessId::current(), "Writing spec logs", &e);
        }

        let Some(fact) = coordinator.end_spec(log).await? else {
            return Ok(());
        };

        if fact.is_failed() {
            let failed_dir = self.config.failed_specs_dir().join(sanitize_file_name(&display_name));
            if let Err(e) = self.file_system.copy_dir(&spec_dir, &failed_dir).await {
                logging::log_error(ProcessId::current(), "Copying failed spec logs", &e);
            }
            process_warn!(ProcessId::current(), "❌ {} failed after {} ms", display_name, fact.elapsed_ms);
        } else {
            process_info!(ProcessId::current(), "✅ {} passed in {} ms", display_name, fact.elapsed_ms);
        }

        if self.config.print_timeline {
            timeline.print_to_console().await?;
        }
        Ok(())
    }
}
