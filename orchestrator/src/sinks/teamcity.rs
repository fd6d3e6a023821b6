//! TeamCity service-message reporter
//!
//! Every spec is a test suite and every node a test inside it. Node tests are
//! written when the spec ends, once each slot carries its elapsed time and
//! failure detail.

use async_trait::async_trait;
use std::io::Write;

use shared::{LogLevel, Spec};

use crate::core::results::{FactData, NodeFact, NodeResult, NodeStatus, TestRunTree};
use crate::traits::{ReportingSink, RunContext};

/// Escape a value for a `##teamcity[...]` attribute
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '|' => escaped.push_str("||"),
            '\'' => escaped.push_str("|'"),
            '\n' => escaped.push_str("|n"),
            '\r' => escaped.push_str("|r"),
            '[' => escaped.push_str("|["),
            ']' => escaped.push_str("|]"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn node_test_name(spec_name: &str, node: &NodeFact) -> String {
    format!("{spec_name}.node{}:{}", node.index, node.role)
}

pub struct TeamCitySink<W: Write + Send + Sync> {
    out: W,
}

impl TeamCitySink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + Sync> TeamCitySink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn message(&mut self, name: &str, attributes: &[(&str, &str)]) -> std::io::Result<()> {
        let mut line = format!("##teamcity[{name}");
        for (key, value) in attributes {
            line.push_str(&format!(" {key}='{}'", escape(value)));
        }
        line.push(']');
        writeln!(self.out, "{line}")
    }

    fn node_test(&mut self, spec_name: &str, node: &NodeFact) -> std::io::Result<()> {
        let name = node_test_name(spec_name, node);
        self.message("testStarted", &[("name", name.as_str())])?;
        match node.status {
            NodeStatus::Passed => {}
            NodeStatus::Skipped => {
                let reason = node.messages.join("\n");
                self.message("testIgnored", &[("name", name.as_str()), ("message", reason.as_str())])?;
            }
            NodeStatus::Failed => {
                let message = node.messages.join("\n");
                let details = node
                    .failures
                    .iter()
                    .map(|f| format!("{}\n{}", f.summary(), f.stack_trace))
                    .collect::<Vec<_>>()
                    .join("\n");
                let attributes = [
                    ("name", name.as_str()),
                    ("message", message.as_str()),
                    ("details", details.as_str()),
                ];
                self.message("testFailed", &attributes)?;
            }
        }
        let duration = node.elapsed_ms.to_string();
        self.message("testFinished", &[("name", name.as_str()), ("duration", duration.as_str())])
    }
}

#[async_trait]
impl<W: Write + Send + Sync> ReportingSink for TeamCitySink<W> {
    fn name(&self) -> String {
        "teamcity".to_string()
    }

    async fn open(&mut self, _run: &RunContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn begin_spec(&mut self, spec: &Spec) -> anyhow::Result<()> {
        self.message("testSuiteStarted", &[("name", spec.display_name().as_str())])?;
        Ok(())
    }

    async fn node_result(&mut self, _spec: &Spec, _result: &NodeResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn end_spec(&mut self, fact: &FactData) -> anyhow::Result<()> {
        let spec_name = fact.spec.display_name();

        if fact.nodes.is_empty() {
            // Nothing ran: errored config or a spec that ended before any node reported
            let name = format!("{spec_name}.setup");
            self.message("testStarted", &[("name", name.as_str())])?;
            let (outcome, message) = match &fact.skip_reason {
                Some(reason) => ("testIgnored", reason.as_str()),
                None => ("testFailed", "no node reported a result"),
            };
            self.message(outcome, &[("name", name.as_str()), ("message", message)])?;
            self.message("testFinished", &[("name", name.as_str())])?;
        }

        for node in fact.nodes.values() {
            self.node_test(&spec_name, node)?;
        }
        self.message("testSuiteFinished", &[("name", spec_name.as_str())])?;
        Ok(())
    }

    async fn log_runner_message(&mut self, message: &str, source: &str, level: LogLevel) -> anyhow::Result<()> {
        let status = match level {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info | LogLevel::Debug => "NORMAL",
        };
        let text = format!("[{source}] {message}");
        self.message("message", &[("text", text.as_str()), ("status", status)])?;
        Ok(())
    }

    async fn offer(&mut self, message: &str) -> anyhow::Result<()> {
        self.message("message", &[("text", message), ("status", "NORMAL")])?;
        Ok(())
    }

    fn exit_code(&self, _tree: &TestRunTree) -> Option<i32> {
        None
    }

    async fn close(&mut self, _run: &RunContext, _tree: &TestRunTree) -> anyhow::Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
