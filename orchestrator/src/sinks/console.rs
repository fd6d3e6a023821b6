//! Human-readable console reporter

use async_trait::async_trait;
use std::io::Write;

use shared::{LogLevel, Spec};

use crate::core::results::{FactData, NodeResult, NodeStatus, TestRunTree};
use crate::traits::{ReportingSink, RunContext};

pub struct ConsoleSink<W: Write + Send + Sync> {
    out: W,
    /// Runner messages below this level are not shown
    min_level: LogLevel,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + Sync> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            min_level: LogLevel::Info,
        }
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send + Sync> ReportingSink for ConsoleSink<W> {
    fn name(&self) -> String {
        "console".to_string()
    }

    async fn open(&mut self, run: &RunContext) -> anyhow::Result<()> {
        writeln!(
            self.out,
            "🧪 Running {} specs from {} (run {})",
            run.spec_count, run.assembly, run.run_id
        )?;
        Ok(())
    }

    async fn begin_spec(&mut self, spec: &Spec) -> anyhow::Result<()> {
        writeln!(self.out, "▶️  {} ({} nodes)", spec.display_name(), spec.node_count())?;
        Ok(())
    }

    async fn node_result(&mut self, _spec: &Spec, result: &NodeResult) -> anyhow::Result<()> {
        let verdict = match result.status {
            NodeStatus::Passed => "PASS",
            NodeStatus::Failed => "FAIL",
            NodeStatus::Skipped => "SKIP",
        };
        writeln!(
            self.out,
            "   [NODE{}:{}] {} {}",
            result.index, result.role, verdict, result.message
        )?;
        Ok(())
    }

    async fn end_spec(&mut self, fact: &FactData) -> anyhow::Result<()> {
        let name = fact.spec.display_name();
        if let Some(reason) = &fact.skip_reason {
            writeln!(self.out, "⏭️  SKIPPED {name}: {reason}")?;
            return Ok(());
        }
        if fact.passed {
            writeln!(self.out, "✅ PASSED {name} in {} ms", fact.elapsed_ms)?;
            return Ok(());
        }

        writeln!(self.out, "❌ FAILED {name} in {} ms", fact.elapsed_ms)?;
        let expected = fact.spec.node_count() as usize;
        if fact.nodes.len() < expected {
            writeln!(self.out, "   {} of {} nodes never reported", expected - fact.nodes.len(), expected)?;
        }
        for node in fact.failed_nodes() {
            for failure in &node.failures {
                writeln!(self.out, "   [NODE{}:{}] {}", node.index, node.role, failure.summary())?;
            }
        }
        Ok(())
    }

    async fn log_runner_message(&mut self, message: &str, source: &str, level: LogLevel) -> anyhow::Result<()> {
        if level >= self.min_level {
            writeln!(self.out, "[RUNNER][{level}][{source}] {message}")?;
        }
        Ok(())
    }

    async fn offer(&mut self, message: &str) -> anyhow::Result<()> {
        writeln!(self.out, "{message}")?;
        Ok(())
    }

    fn exit_code(&self, _tree: &TestRunTree) -> Option<i32> {
        None
    }

    async fn close(&mut self, _run: &RunContext, tree: &TestRunTree) -> anyhow::Result<()> {
        writeln!(
            self.out,
            "🏁 {} passed, {} failed, {} skipped",
            tree.passed_count(),
            tree.failed_count(),
            tree.skipped_count()
        )?;
        self.out.flush()?;
        Ok(())
    }
}
