//! Real process management service implementation
//!
//! Spawns one OS process per node, pumps its output into the spec timeline
//! and waits for it with a ceiling. A node that overruns the ceiling or is
//! cancelled is asked to stop (SIGTERM on Unix) and hard-killed after the
//! grace period.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use shared::protocol::FailureDetail;
use shared::{exit_codes, process_debug, process_warn, NodeInfo, NodeLaunchArgs, NodeTest, ProcessId};

use crate::core::results::NodeCompletion;
use crate::core::timeline::TimelineHandle;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::process_output_handler::{drain_pumps, spawn_line_pump};
use crate::traits::ProcessManager;

pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);
const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_secs(5);

/// How a node process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExit {
    /// Exited on its own; `None` when killed by a signal
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

/// Result of supervising one node process
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node: NodeInfo,
    pub exit: NodeExit,
    pub elapsed: Duration,
    /// Failure detail parsed out of the captured output
    pub failures: Vec<FailureDetail>,
}

impl NodeOutcome {
    pub fn passed(&self) -> bool {
        self.exit == NodeExit::Exited(Some(exit_codes::PASSED))
    }

    pub fn describe(&self) -> String {
        match self.exit {
            NodeExit::Exited(Some(code)) => format!("exited with code {code} after {:?}", self.elapsed),
            NodeExit::Exited(None) => format!("terminated by a signal after {:?}", self.elapsed),
            NodeExit::TimedOut => format!("timed out after {:?} and was terminated", self.elapsed),
            NodeExit::Cancelled => "cancelled and terminated".to_string(),
        }
    }

    /// Completion report for the coordinator, with a synthesized failure
    /// when the output carried none
    pub fn completion(&self) -> NodeCompletion {
        let message = self.describe();
        if self.passed() {
            return NodeCompletion::success(self.node.index, self.node.role.clone(), message);
        }

        let mut failures = self.failures.clone();
        if failures.is_empty() {
            let exception_type = match self.exit {
                NodeExit::TimedOut => "NodeTimeout",
                NodeExit::Cancelled => "NodeCancelled",
                NodeExit::Exited(Some(exit_codes::HOST_ERROR)) => "NodeHostError",
                NodeExit::Exited(_) => "NodeProcessFailure",
            };
            failures.push(FailureDetail::new(exception_type, message.clone()));
        }
        NodeCompletion::failure(self.node.index, self.node.role.clone(), message, failures)
    }
}

/// Real process manager implementation
pub struct RealProcessManager {
    node_timeout: Duration,
    kill_grace: Duration,
}

impl Default for RealProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RealProcessManager {
    /// Create new process manager with default settings
    pub fn new() -> Self {
        Self {
            node_timeout: DEFAULT_NODE_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Configure per-node wait ceiling (fluent API)
    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    /// Configure the grace period between SIGTERM and kill (fluent API)
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    fn command(args: &NodeLaunchArgs) -> Command {
        let mut cmd = Command::new(&args.assembly);
        cmd.args(args.to_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Graceful stop, then a hard kill once the grace period runs out
    async fn terminate(&self, child: &mut Child, node: &NodeInfo) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    process_debug!(ProcessId::current(), "SIGTERM to {} (PID {}) failed: {}", node, pid, e);
                }
                if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                    return;
                }
            }
        }

        process_warn!(ProcessId::current(), "🔪 Killing {} after {:?} grace period", node, self.kill_grace);
        if let Err(e) = child.kill().await {
            process_warn!(ProcessId::current(), "⚠️ Failed to kill {}: {}", node, e);
        }
    }
}

#[async_trait]
impl ProcessManager for RealProcessManager {
    async fn run_node(
        &self,
        node: &NodeTest,
        args: NodeLaunchArgs,
        timeline: TimelineHandle,
        cancel: CancellationToken,
    ) -> OrchestratorResult<NodeOutcome> {
        let info = node.node_info();
        let mut child = Self::command(&args)
            .spawn()
            .map_err(|e| OrchestratorError::NodeSpawnFailed {
                node: info.to_string(),
                message: format!("{}: {e}", args.assembly),
            })?;

        process_debug!(
            ProcessId::current(),
            "🚀 Spawned {} for {} (PID: {})",
            info,
            info.spec_name,
            child.id().unwrap_or(0)
        );

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_line_pump(stdout, info.clone(), timeline.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_line_pump(stderr, info.clone(), timeline.clone()));
        }

        let started = Instant::now();
        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => NodeExit::Exited(status.code()),
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Waiting on {} failed: {}", info, e);
                    self.terminate(&mut child, &info).await;
                    NodeExit::Exited(None)
                }
            },
            _ = tokio::time::sleep(self.node_timeout) => {
                process_warn!(ProcessId::current(), "⏰ {} exceeded {:?}", info, self.node_timeout);
                self.terminate(&mut child, &info).await;
                NodeExit::TimedOut
            }
            _ = cancel.cancelled() => {
                self.terminate(&mut child, &info).await;
                NodeExit::Cancelled
            }
        };
        let elapsed = started.elapsed();

        let failures = drain_pumps(pumps, OUTPUT_DRAIN_LIMIT).await;
        let outcome = NodeOutcome {
            node: info,
            exit,
            elapsed,
            failures,
        };
        process_debug!(ProcessId::current(), "🏁 {} {}", outcome.node, outcome.describe());
        Ok(outcome)
    }
}
