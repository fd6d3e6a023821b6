//! Timeline log collector
//!
//! One collector actor exists per spec run and is the single writer for that
//! run's log lines. Entries are keyed by timestamp in a multi-valued map so
//! identical timestamps from different nodes are all retained.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use shared::protocol::parse_timestamp;
use shared::{process_debug, LogLevel, NodeInfo, ProcessId};

use crate::core::results::{LogMessageInfo, NodeLog, SpecLog};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::FileSystem;

pub const AGGREGATED_FILE_NAME: &str = "aggregated.txt";

const MAILBOX_SIZE: usize = 1024;

enum TimelineCommand {
    Record {
        node: NodeInfo,
        line: String,
        received_at: DateTime<Utc>,
    },
    GetSpecLog {
        reply: oneshot::Sender<SpecLog>,
    },
    DumpToFile {
        directory: PathBuf,
        reply: oneshot::Sender<OrchestratorResult<()>>,
    },
    PrintToConsole {
        reply: oneshot::Sender<()>,
    },
}

/// Whether a bracketed token is a node tag such as `NODE1:first` or `Node2:second`
fn is_node_tag(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix("node") else {
        return false;
    };
    match rest.split_once(':') {
        Some((digits, role)) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) && !role.is_empty(),
        None => false,
    }
}

/// Parse one raw line into a timeline entry.
///
/// Leading bracket markers are consumed: the first timestamp that parses
/// overrides `received_at`, a level marker sets the severity and node tags
/// are dropped. Result markers (`[PASS]`, `[FAIL...]`) stay in the text.
pub fn parse_line(node: &NodeInfo, raw: &str, received_at: DateTime<Utc>) -> LogMessageInfo {
    let mut timestamp = None;
    let mut level = None;
    let mut rest = raw.trim_end();

    loop {
        let trimmed = rest.trim_start();
        let Some(inner) = trimmed.strip_prefix('[') else {
            break;
        };
        let Some(end) = inner.find(']') else {
            break;
        };
        let token = &inner[..end];

        if timestamp.is_none() && parse_timestamp(token).is_some() {
            timestamp = parse_timestamp(token);
        } else if level.is_none() && token.parse::<LogLevel>().is_ok() {
            level = token.parse::<LogLevel>().ok();
        } else if !is_node_tag(token) {
            break;
        }

        let after = &inner[end + 1..];
        rest = after.strip_prefix(':').unwrap_or(after);
    }

    let message = rest.trim_start();
    let level = level.unwrap_or(if message.starts_with("[FAIL") {
        LogLevel::Error
    } else {
        LogLevel::Info
    });

    LogMessageInfo {
        node: node.clone(),
        timestamp: timestamp.unwrap_or(received_at),
        level,
        message: message.to_string(),
    }
}

struct TimelineCollector {
    spec_name: String,
    entries: BTreeMap<DateTime<Utc>, Vec<LogMessageInfo>>,
    nodes: BTreeMap<u32, NodeInfo>,
    file_system: Arc<dyn FileSystem>,
}

impl TimelineCollector {
    fn record(&mut self, node: NodeInfo, line: &str, received_at: DateTime<Utc>) {
        if line.trim().is_empty() {
            return;
        }
        let entry = parse_line(&node, line, received_at);
        self.nodes.entry(node.index).or_insert(node);
        self.entries.entry(entry.timestamp).or_default().push(entry);
    }

    fn spec_log(&self) -> SpecLog {
        let aggregated = self
            .entries
            .values()
            .flatten()
            .map(LogMessageInfo::format)
            .collect();

        let nodes = self
            .nodes
            .values()
            .map(|node| NodeLog {
                index: node.index,
                role: node.role.clone(),
                platform: node.platform.clone(),
                entries: self
                    .entries
                    .values()
                    .flatten()
                    .filter(|entry| entry.node.index == node.index)
                    .cloned()
                    .collect(),
            })
            .collect();

        SpecLog {
            spec_name: self.spec_name.clone(),
            aggregated,
            nodes,
        }
    }

    async fn dump_to_file(&self, directory: &Path) -> OrchestratorResult<()> {
        let log = self.spec_log();
        self.file_system.create_dir_all(directory).await?;
        self.file_system
            .write_file(&directory.join(AGGREGATED_FILE_NAME), &join_lines(&log.aggregated))
            .await?;
        for node in &log.nodes {
            self.file_system
                .write_file(&directory.join(node.file_name()), &join_lines(&node.lines()))
                .await?;
        }
        process_debug!(
            ProcessId::current(),
            "💾 Dumped {} timeline entries for {} to {}",
            log.entry_count(),
            self.spec_name,
            directory.display()
        );
        Ok(())
    }

    fn print_to_console(&self) {
        let mut by_spec: BTreeMap<&str, Vec<&LogMessageInfo>> = BTreeMap::new();
        for entry in self.entries.values().flatten() {
            by_spec.entry(entry.node.spec_name.as_str()).or_default().push(entry);
        }
        for (spec_name, entries) in by_spec {
            println!("===== {spec_name} =====");
            for entry in entries {
                println!("{}", entry.format());
            }
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<TimelineCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                TimelineCommand::Record {
                    node,
                    line,
                    received_at,
                } => self.record(node, &line, received_at),
                TimelineCommand::GetSpecLog { reply } => {
                    let _ = reply.send(self.spec_log());
                }
                TimelineCommand::DumpToFile { directory, reply } => {
                    let _ = reply.send(self.dump_to_file(&directory).await);
                }
                TimelineCommand::PrintToConsole { reply } => {
                    self.print_to_console();
                    let _ = reply.send(());
                }
            }
        }
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Handle to a running collector; cheap to clone
#[derive(Clone)]
pub struct TimelineHandle {
    spec_name: String,
    tx: mpsc::Sender<TimelineCommand>,
}

impl TimelineHandle {
    /// Start a collector for one spec run
    pub fn spawn(spec_name: impl Into<String>, file_system: Arc<dyn FileSystem>) -> Self {
        let spec_name = spec_name.into();
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let collector = TimelineCollector {
            spec_name: spec_name.clone(),
            entries: BTreeMap::new(),
            nodes: BTreeMap::new(),
            file_system,
        };
        tokio::spawn(collector.run(rx));
        Self { spec_name, tx }
    }

    pub fn spec_name(&self) -> &str {
        &self.spec_name
    }

    fn stopped(&self) -> OrchestratorError {
        OrchestratorError::stopped(format!("timeline collector for {}", self.spec_name))
    }

    /// Append a raw line received now
    pub async fn record(&self, node: &NodeInfo, line: &str) {
        self.record_at(node, line, Utc::now()).await;
    }

    pub async fn record_at(&self, node: &NodeInfo, line: &str, received_at: DateTime<Utc>) {
        let command = TimelineCommand::Record {
            node: node.clone(),
            line: line.to_string(),
            received_at,
        };
        if self.tx.send(command).await.is_err() {
            process_debug!(ProcessId::current(), "Timeline for {} closed, dropping line", self.spec_name);
        }
    }

    pub async fn spec_log(&self) -> OrchestratorResult<SpecLog> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TimelineCommand::GetSpecLog { reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Write `aggregated.txt` and one file per node into `directory`
    pub async fn dump_to_file(&self, directory: &Path) -> OrchestratorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TimelineCommand::DumpToFile {
                directory: directory.to_path_buf(),
                reply,
            })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn print_to_console(&self) -> OrchestratorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TimelineCommand::PrintToConsole { reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }
}
