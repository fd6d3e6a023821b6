//! Run tree assertions
//!
//! Checks a finished [`RunReport`] against scenario expectations and yields one
//! [`AssertionResult`] per check, so a harness can print every miss at once.

use std::path::Path;

use orchestrator::core::results::{FactData, NodeStatus};
use orchestrator::RunReport;
use shared::ERRORED_SKIP_REASON;

use crate::scenarios::{Expected, ExpectedOutcome};

#[derive(Debug, Clone)]
pub struct AssertionResult {
    pub success: bool,
    pub message: String,
    pub details: Option<String>,
}

impl AssertionResult {
    pub fn success(message: String) -> Self {
        Self {
            success: true,
            message,
            details: None,
        }
    }

    pub fn failure(message: String, details: Option<String>) -> Self {
        Self {
            success: false,
            message,
            details,
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

pub struct RunAssertions<'a> {
    report: &'a RunReport,
}

impl<'a> RunAssertions<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self { report }
    }

    fn fact(&self, display_name: &str) -> Option<&'a FactData> {
        self.report
            .tree
            .facts
            .iter()
            .find(|fact| fact.spec.display_name() == display_name)
    }

    /// Assert the run exited with the given code
    pub fn assert_exit_code(&self, expected: i32) -> AssertionResult {
        if self.report.exit_code == expected {
            AssertionResult::success(format!("Run exited with {expected}"))
        } else {
            AssertionResult::failure(
                format!("Run exited with {}, expected {expected}", self.report.exit_code),
                None,
            )
        }
    }

    /// Assert one spec ended the expected way
    pub fn assert_outcome(&self, expected: &Expected) -> AssertionResult {
        let name = &expected.display_name;
        let Some(fact) = self.fact(name) else {
            return AssertionResult::failure(format!("{name} missing from the run tree"), None);
        };

        let node_summary = fact
            .nodes
            .values()
            .map(|node| format!("node{}:{} {:?}", node.index, node.role, node.status))
            .collect::<Vec<_>>()
            .join(", ");
        let expected_nodes = fact.spec.node_count() as usize;

        let (ok, what) = match &expected.outcome {
            ExpectedOutcome::Passed => (
                fact.passed
                    && fact.nodes.len() == expected_nodes
                    && fact.nodes.values().all(|n| n.status == NodeStatus::Passed),
                "passed".to_string(),
            ),
            ExpectedOutcome::Failed { failed_nodes } => (
                fact.is_failed() && fact.failed_nodes().count() == *failed_nodes,
                format!("failed on {failed_nodes} node(s)"),
            ),
            ExpectedOutcome::Skipped => (
                fact.is_skipped()
                    && fact.nodes.len() == expected_nodes
                    && fact.nodes.values().all(|n| n.status == NodeStatus::Skipped),
                "skipped on every node".to_string(),
            ),
            ExpectedOutcome::Errored => (
                fact.skip_reason.as_deref() == Some(ERRORED_SKIP_REASON) && fact.nodes.is_empty(),
                "errored".to_string(),
            ),
        };

        if ok {
            AssertionResult::success(format!("{name} {what}"))
        } else {
            AssertionResult::failure(format!("{name} was expected to be {what}"), Some(node_summary))
        }
    }

    /// Assert the aggregated log of a spec was written under `output_dir`
    pub fn assert_logs_written(&self, output_dir: &Path, display_name: &str) -> AssertionResult {
        let path = output_dir.join(display_name).join("aggregated.txt");
        match std::fs::read_to_string(&path) {
            Ok(contents) if !contents.trim().is_empty() => {
                AssertionResult::success(format!("{display_name} logs written"))
            }
            Ok(_) => AssertionResult::failure(format!("{display_name} aggregated log is empty"), None),
            Err(e) => AssertionResult::failure(format!("{display_name} aggregated log missing"), None)
                .with_details(format!("{}: {e}", path.display())),
        }
    }

    /// Every expectation, in order
    pub fn check_all(&self, expectations: &[Expected]) -> Vec<AssertionResult> {
        expectations.iter().map(|expected| self.assert_outcome(expected)).collect()
    }
}
