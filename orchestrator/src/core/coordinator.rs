//! Sink coordinator and result aggregator
//!
//! A single actor owns the run tree, the FactData of the spec in flight and
//! every reporting sink. All traffic reaches it through its mailbox:
//! commands from the run loop, completion reports from the supervisor and
//! raw messages from the ingestion server. Per spec it moves
//! `Idle -> SpecRunning -> SpecEnding -> Idle`.
//!
//! Sink calls are isolated: an error or a panic inside one sink is logged and
//! the remaining sinks still see the event.

use chrono::Utc;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use shared::protocol::{self, ClassifiedMessage, FailureDetail};
use shared::{process_debug, process_error, process_warn, LogLevel, NodeInfo, ProcessId, RoleName, Spec};

use crate::core::results::{FactData, NodeCompletion, NodeResult, RunReport, SpecLog, TestRunTree};
use crate::core::timeline::TimelineHandle;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{MessageRouter, ReportingSink, RunContext};

const MAILBOX_SIZE: usize = 1024;

/// Lifecycle of the spec currently owned by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Idle,
    SpecRunning,
    SpecEnding,
}

enum CoordinatorCommand {
    Open {
        reply: oneshot::Sender<()>,
    },
    BeginSpec {
        spec: Spec,
        timeline: Option<TimelineHandle>,
        reply: oneshot::Sender<()>,
    },
    Ingest {
        message: String,
    },
    NodeCompleted {
        completion: NodeCompletion,
        reply: oneshot::Sender<()>,
    },
    EndSpec {
        log: SpecLog,
        reply: oneshot::Sender<Option<FactData>>,
    },
    SkipSpec {
        spec: Spec,
        reply: oneshot::Sender<FactData>,
    },
    RunnerMessage {
        level: LogLevel,
        source: String,
        message: String,
    },
    Phase {
        reply: oneshot::Sender<CoordinatorPhase>,
    },
    CloseAllSinks {
        reply: oneshot::Sender<RunReport>,
    },
}

/// Spec in flight
struct ActiveSpec {
    fact: FactData,
    timeline: Option<TimelineHandle>,
}

async fn guarded<F>(sink: &str, operation: &str, call: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            process_warn!(ProcessId::current(), "⚠️ Sink {} failed in {}: {:#}", sink, operation, e);
        }
        Err(_) => {
            process_error!(ProcessId::current(), "💥 Sink {} panicked in {}", sink, operation);
        }
    }
}

struct SinkCoordinator {
    run: RunContext,
    sinks: Vec<Box<dyn ReportingSink>>,
    tree: TestRunTree,
    phase: CoordinatorPhase,
    active: Option<ActiveSpec>,
    report: Option<RunReport>,
}

impl SinkCoordinator {
    async fn open(&mut self) {
        let run = &self.run;
        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            guarded(&name, "open", async { sink.open(run).await }).await;
        }
    }

    async fn begin_spec(&mut self, spec: Spec, timeline: Option<TimelineHandle>) {
        if self.active.is_some() {
            process_warn!(
                ProcessId::current(),
                "⚠️ {} began while a spec was still running, ending the previous one",
                spec.display_name()
            );
            self.end_spec(None).await;
        }

        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            guarded(&name, "begin_spec", async { sink.begin_spec(&spec).await }).await;
        }

        self.active = Some(ActiveSpec {
            fact: FactData::new(spec, Utc::now()),
            timeline,
        });
        self.phase = CoordinatorPhase::SpecRunning;
    }

    async fn node_completed(&mut self, completion: NodeCompletion) {
        let Some(active) = self.active.as_mut() else {
            process_debug!(
                ProcessId::current(),
                "Completion for node {} arrived with no spec running",
                completion.index
            );
            return;
        };
        if !active.fact.expects(completion.index, &completion.role) {
            process_warn!(
                ProcessId::current(),
                "⚠️ {} has no node {}:{}, passing the result on as unclassified",
                active.fact.spec.display_name(),
                completion.index,
                completion.role
            );
            let record = format!("[Node{}:{}] {}", completion.index, completion.role, completion.message);
            self.offer(&record).await;
            return;
        }

        let Some(result) = active.fact.record_completion(completion, Utc::now()) else {
            return;
        };
        let spec = active.fact.spec.clone();
        self.publish_node_result(&spec, &result).await;
    }

    async fn publish_node_result(&mut self, spec: &Spec, result: &NodeResult) {
        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            guarded(&name, "node_result", async { sink.node_result(spec, result).await }).await;
        }
    }

    /// Whether a result line belongs to the spec in flight
    fn is_current(&self, display_name: &str) -> bool {
        match &self.active {
            Some(active) => display_name.is_empty() || active.fact.spec.display_name() == display_name,
            None => false,
        }
    }

    /// Whether a node result belongs to a declared node of the spec in flight
    fn is_declared(&self, index: u32, role: &RoleName) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.fact.expects(index, role))
    }

    async fn ingest(&mut self, message: &str) {
        for record in protocol::split_records(message) {
            match protocol::classify(&record) {
                ClassifiedMessage::RunnerLog {
                    level, source, message, ..
                } => self.runner_message(level, &source, &message).await,
                ClassifiedMessage::NodePass {
                    index,
                    role,
                    display_name,
                } if self.is_current(&display_name) && self.is_declared(index, &role) => {
                    let message = format!("[PASS] {display_name}");
                    self.node_completed(NodeCompletion::success(index, role, message)).await;
                }
                ClassifiedMessage::NodeFail {
                    index,
                    role,
                    display_name,
                    failures,
                } if self.is_current(&display_name) && self.is_declared(index, &role) => {
                    let message = failure_message(&failures);
                    self.node_completed(NodeCompletion::failure(index, role, message, failures))
                        .await;
                }
                ClassifiedMessage::NodeFailureException { index, role, failures } if self.is_declared(index, &role) => {
                    let message = failure_message(&failures);
                    self.node_completed(NodeCompletion::failure(index, role, message, failures))
                        .await;
                }
                ClassifiedMessage::NodeLogFragment { index, role, .. } if self.active.is_some() => {
                    if let Some(active) = &self.active {
                        if let Some(timeline) = &active.timeline {
                            let node = NodeInfo::new(index, role, active.fact.spec.display_name());
                            timeline.record(&node, &record).await;
                        }
                    }
                }
                _ => self.offer(&record).await,
            }
        }
    }

    async fn offer(&mut self, record: &str) {
        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            guarded(&name, "offer", async { sink.offer(record).await }).await;
        }
    }

    async fn runner_message(&mut self, level: LogLevel, source: &str, message: &str) {
        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            let call = async { sink.log_runner_message(message, source, level).await };
            guarded(&name, "log_runner_message", call).await;
        }
    }

    async fn end_spec(&mut self, log: Option<SpecLog>) -> Option<FactData> {
        let Some(active) = self.active.take() else {
            process_warn!(ProcessId::current(), "⚠️ End of spec requested with no spec running");
            return None;
        };
        self.phase = CoordinatorPhase::SpecEnding;

        let mut fact = active.fact;
        let log = log.unwrap_or_else(|| SpecLog::empty(fact.spec.display_name()));
        fact.finalize(log, Utc::now());

        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            guarded(&name, "end_spec", async { sink.end_spec(&fact).await }).await;
        }

        self.tree.facts.push(fact.clone());
        self.phase = CoordinatorPhase::Idle;
        Some(fact)
    }

    async fn skip_spec(&mut self, spec: Spec) -> FactData {
        let reason = spec.skip_reason.clone().unwrap_or_default();
        let nodes = spec.node_tests();
        self.begin_spec(spec.clone(), None).await;

        for node in nodes {
            if let Some(active) = self.active.as_mut() {
                let result = active.fact.record_skipped(node.index, node.role, &reason);
                self.publish_node_result(&spec, &result).await;
            }
        }

        let log = SpecLog::empty(spec.display_name());
        match self.end_spec(Some(log)).await {
            Some(fact) => fact,
            None => FactData::new(spec, Utc::now()),
        }
    }

    async fn close_all_sinks(&mut self) -> RunReport {
        if let Some(report) = &self.report {
            process_debug!(ProcessId::current(), "Sinks already closed, ignoring duplicate close");
            return report.clone();
        }

        if self.active.is_some() {
            self.end_spec(None).await;
        }
        self.tree.finished_at = Some(Utc::now());

        let mut exit_code = self.tree.exit_code();
        for sink in self.sinks.iter() {
            let name = sink.name();
            match std::panic::catch_unwind(AssertUnwindSafe(|| sink.exit_code(&self.tree))) {
                Ok(Some(code)) => exit_code = exit_code.max(code),
                Ok(None) => {}
                Err(_) => process_error!(ProcessId::current(), "💥 Sink {} panicked in exit_code", name),
            }
        }

        let (run, tree) = (&self.run, &self.tree);
        for sink in self.sinks.iter_mut() {
            let name = sink.name();
            guarded(&name, "close", async { sink.close(run, tree).await }).await;
        }

        let report = RunReport {
            tree: self.tree.clone(),
            exit_code,
        };
        self.report = Some(report.clone());
        report
    }

    async fn run(mut self, mut commands: mpsc::Receiver<CoordinatorCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                CoordinatorCommand::Open { reply } => {
                    self.open().await;
                    let _ = reply.send(());
                }
                CoordinatorCommand::BeginSpec { spec, timeline, reply } => {
                    self.begin_spec(spec, timeline).await;
                    let _ = reply.send(());
                }
                CoordinatorCommand::Ingest { message } => self.ingest(&message).await,
                CoordinatorCommand::NodeCompleted { completion, reply } => {
                    self.node_completed(completion).await;
                    let _ = reply.send(());
                }
                CoordinatorCommand::EndSpec { log, reply } => {
                    let _ = reply.send(self.end_spec(Some(log)).await);
                }
                CoordinatorCommand::SkipSpec { spec, reply } => {
                    let _ = reply.send(self.skip_spec(spec).await);
                }
                CoordinatorCommand::RunnerMessage { level, source, message } => {
                    self.runner_message(level, &source, &message).await;
                }
                CoordinatorCommand::Phase { reply } => {
                    let _ = reply.send(self.phase);
                }
                CoordinatorCommand::CloseAllSinks { reply } => {
                    let _ = reply.send(self.close_all_sinks().await);
                }
            }
        }
    }
}

fn failure_message(failures: &[FailureDetail]) -> String {
    match failures.first() {
        Some(failure) => failure.summary(),
        None => "[FAIL]".to_string(),
    }
}

/// Handle to the coordinator actor; cheap to clone
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    /// Start the coordinator owning `sinks`
    pub fn spawn(run: RunContext, sinks: Vec<Box<dyn ReportingSink>>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let coordinator = SinkCoordinator {
            tree: TestRunTree {
                run_id: run.run_id,
                ..TestRunTree::new(run.assembly.clone())
            },
            run,
            sinks,
            phase: CoordinatorPhase::Idle,
            active: None,
            report: None,
        };
        let task = tokio::spawn(coordinator.run(rx));
        (Self { tx }, task)
    }

    async fn send(&self, command: CoordinatorCommand) -> OrchestratorResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| OrchestratorError::stopped("sink coordinator"))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> OrchestratorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| OrchestratorError::stopped("sink coordinator"))
    }

    pub async fn open(&self) -> OrchestratorResult<()> {
        self.request(|reply| CoordinatorCommand::Open { reply }).await
    }

    pub async fn begin_spec(&self, spec: Spec, timeline: Option<TimelineHandle>) -> OrchestratorResult<()> {
        self.request(|reply| CoordinatorCommand::BeginSpec { spec, timeline, reply })
            .await
    }

    /// Queue a raw logical message for classification
    pub async fn ingest(&self, message: String) -> OrchestratorResult<()> {
        self.send(CoordinatorCommand::Ingest { message }).await
    }

    pub async fn node_completed(&self, completion: NodeCompletion) -> OrchestratorResult<()> {
        self.request(|reply| CoordinatorCommand::NodeCompleted { completion, reply })
            .await
    }

    /// Finalize the spec in flight; `None` when no spec was running
    pub async fn end_spec(&self, log: SpecLog) -> OrchestratorResult<Option<FactData>> {
        self.request(|reply| CoordinatorCommand::EndSpec { log, reply }).await
    }

    /// Report a skipped or errored spec without running it
    pub async fn skip_spec(&self, spec: Spec) -> OrchestratorResult<FactData> {
        self.request(|reply| CoordinatorCommand::SkipSpec { spec, reply }).await
    }

    pub async fn runner_message(
        &self,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> OrchestratorResult<()> {
        self.send(CoordinatorCommand::RunnerMessage {
            level,
            source: source.into(),
            message: message.into(),
        })
        .await
    }

    pub async fn phase(&self) -> OrchestratorResult<CoordinatorPhase> {
        self.request(|reply| CoordinatorCommand::Phase { reply }).await
    }

    /// Close every sink and return the run report; later calls return the same report
    pub async fn close_all_sinks(&self) -> OrchestratorResult<RunReport> {
        self.request(|reply| CoordinatorCommand::CloseAllSinks { reply }).await
    }
}

#[async_trait::async_trait]
impl MessageRouter for CoordinatorHandle {
    async fn route(&self, message: String) {
        if let Err(e) = self.ingest(message).await {
            process_debug!(ProcessId::current(), "Dropping ingested message: {}", e);
        }
    }
}
