//! What a spec body sees while running on one node

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use shared::protocol::{self, FailureDetail, FRAGMENT_THRESHOLD};
use shared::{process_warn, LogLevel, ProcessId, RoleName, Spec};

use crate::error::{NodeError, NodeResult};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP link to the runner's ingestion server.
///
/// Cheap to clone; every clone shares the same stream. Once a write fails the
/// link is dropped and callers fall back to stdout.
#[derive(Clone, Default)]
pub struct RunnerLink {
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl RunnerLink {
    /// A link that never delivers anything
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub async fn connect(address: &str, attempts: u32) -> NodeResult<Self> {
        let mut last_error = None;
        for attempt in 1..=attempts.max(1) {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!("Connected to runner at {} (attempt {})", address, attempt);
                    return Ok(Self {
                        stream: Arc::new(Mutex::new(Some(stream))),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }

        Err(NodeError::ConnectionError {
            message: format!(
                "could not reach runner at {address}: {}",
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Write one wire line; returns whether it went over TCP
    pub async fn send(&self, line: &str) -> bool {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return false;
        };

        let mut payload = format!("{line}\n");
        // The runner only flushes after a read shorter than the threshold.
        if payload.len() % FRAGMENT_THRESHOLD == 0 {
            payload.push('\n');
        }

        let result = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                process_warn!(ProcessId::current(), "Runner link lost, falling back to stdout: {}", e);
                *guard = None;
                false
            }
        }
    }

    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// Per-node context handed to a spec body
#[derive(Clone)]
pub struct NodeContext {
    spec: Spec,
    index: u32,
    role: RoleName,
    server_host: String,
    node_host: String,
    runner: RunnerLink,
}

impl NodeContext {
    pub fn new(
        spec: Spec,
        index: u32,
        role: RoleName,
        server_host: impl Into<String>,
        node_host: impl Into<String>,
        runner: RunnerLink,
    ) -> Self {
        Self {
            spec,
            index,
            role,
            server_host: server_host.into(),
            node_host: node_host.into(),
            runner,
        }
    }

    /// 1-based node index
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn role(&self) -> &RoleName {
        &self.role
    }

    pub fn node_count(&self) -> u32 {
        self.spec.node_count()
    }

    pub fn roles(&self) -> &[RoleName] {
        &self.spec.roles
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn node_host(&self) -> &str {
        &self.node_host
    }

    /// Send a log line into this node's timeline
    pub async fn log(&self, message: impl AsRef<str>) {
        self.log_at(LogLevel::Info, message.as_ref()).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        self.log_at(LogLevel::Warning, message.as_ref()).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        self.log_at(LogLevel::Error, message.as_ref()).await;
    }

    pub async fn log_at(&self, level: LogLevel, message: &str) {
        let message = match level {
            LogLevel::Info => message.to_string(),
            other => format!("[{other}] {message}"),
        };
        let line = protocol::node_fragment(self.index, &self.role, Utc::now(), &message);
        if !self.runner.send(&line).await {
            println!("{line}");
        }
    }

    /// Runner-format line, shown in the run log rather than the spec timeline
    pub(crate) async fn runner_log(&self, level: LogLevel, message: &str) {
        let source = format!("Node{}:{}", self.index, self.role);
        let line = protocol::runner_message(Utc::now(), level, &source, message);
        self.runner.send(&line).await;
    }

    pub(crate) async fn report_pass(&self) {
        let line = protocol::node_pass(self.index, &self.role, &self.spec.display_name());
        println!("{line}");
        self.runner.send(&line).await;
    }

    pub(crate) async fn report_fail(&self, failures: &[FailureDetail]) {
        let block = protocol::node_fail(self.index, &self.role, &self.spec.display_name(), failures);
        println!("{block}");
        self.runner.send(&block).await;
    }
}
