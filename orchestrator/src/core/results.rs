//! Result model: per-node facts, per-spec FactData, the run tree and spec logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use shared::protocol::{self, FailureDetail};
use shared::{exit_codes, LogLevel, NodeInfo, RoleName, Spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome slot of one node within a spec run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFact {
    pub index: u32,
    pub role: RoleName,
    pub status: NodeStatus,
    pub elapsed_ms: u64,
    pub messages: Vec<String>,
    pub failures: Vec<FailureDetail>,
}

impl NodeFact {
    pub fn passed(&self) -> bool {
        self.status == NodeStatus::Passed
    }
}

/// A change to a node slot, reported to sinks
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub index: u32,
    pub role: RoleName,
    pub status: NodeStatus,
    pub message: String,
}

impl NodeResult {
    pub fn passed(&self) -> bool {
        self.status == NodeStatus::Passed
    }
}

/// One node's completion report, from the wire or from the supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCompletion {
    pub index: u32,
    pub role: RoleName,
    pub passed: bool,
    pub message: String,
    pub failures: Vec<FailureDetail>,
}

impl NodeCompletion {
    pub fn success(index: u32, role: RoleName, message: impl Into<String>) -> Self {
        Self {
            index,
            role,
            passed: true,
            message: message.into(),
            failures: Vec::new(),
        }
    }

    pub fn failure(index: u32, role: RoleName, message: impl Into<String>, failures: Vec<FailureDetail>) -> Self {
        Self {
            index,
            role,
            passed: false,
            message: message.into(),
            failures,
        }
    }
}

/// Aggregated outcome of one spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactData {
    pub spec: Spec,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub passed: bool,
    pub skip_reason: Option<String>,
    pub nodes: BTreeMap<u32, NodeFact>,
    #[serde(default)]
    pub log: SpecLog,
}

impl FactData {
    pub fn new(spec: Spec, started_at: DateTime<Utc>) -> Self {
        Self {
            skip_reason: spec.skip_reason.clone(),
            log: SpecLog::empty(spec.display_name()),
            spec,
            started_at,
            finished_at: None,
            elapsed_ms: 0,
            passed: false,
            nodes: BTreeMap::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    /// Failed means executed and not passed; skipped and errored specs are not failures
    pub fn is_failed(&self) -> bool {
        !self.passed && !self.is_skipped()
    }

    fn elapsed_since_start(&self, at: DateTime<Utc>) -> u64 {
        (at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Apply a node completion; returns the new slot if it changed.
    ///
    /// The first report decides the slot. A later failure flips a passed slot,
    /// a later success never clears a failure.
    pub fn record_completion(&mut self, completion: NodeCompletion, at: DateTime<Utc>) -> Option<NodeResult> {
        let elapsed_ms = self.elapsed_since_start(at);
        let status = if completion.passed {
            NodeStatus::Passed
        } else {
            NodeStatus::Failed
        };

        let changed = match self.nodes.get_mut(&completion.index) {
            None => {
                self.nodes.insert(
                    completion.index,
                    NodeFact {
                        index: completion.index,
                        role: completion.role.clone(),
                        status,
                        elapsed_ms,
                        messages: vec![completion.message.clone()],
                        failures: completion.failures,
                    },
                );
                true
            }
            Some(fact) => {
                if !completion.passed {
                    for failure in completion.failures {
                        if !fact.failures.contains(&failure) {
                            fact.failures.push(failure);
                        }
                    }
                    if !fact.messages.contains(&completion.message) {
                        fact.messages.push(completion.message.clone());
                    }
                }
                if fact.status == NodeStatus::Passed && !completion.passed {
                    fact.status = NodeStatus::Failed;
                    fact.elapsed_ms = elapsed_ms;
                    true
                } else {
                    false
                }
            }
        };

        changed.then(|| NodeResult {
            index: completion.index,
            role: completion.role,
            status,
            message: completion.message,
        })
    }

    pub fn record_skipped(&mut self, index: u32, role: RoleName, reason: &str) -> NodeResult {
        self.nodes.insert(
            index,
            NodeFact {
                index,
                role: role.clone(),
                status: NodeStatus::Skipped,
                elapsed_ms: 0,
                messages: vec![reason.to_string()],
                failures: Vec::new(),
            },
        );
        NodeResult {
            index,
            role,
            status: NodeStatus::Skipped,
            message: reason.to_string(),
        }
    }

    /// Close the spec: passed iff every declared node has a slot with its own
    /// role and every slot reported success
    pub fn finalize(&mut self, log: SpecLog, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        self.elapsed_ms = self.elapsed_since_start(at);
        self.log = log;

        let expected = self.spec.node_tests();
        self.passed = !self.is_skipped()
            && !expected.is_empty()
            && expected.iter().all(|node| {
                self.nodes
                    .get(&node.index)
                    .is_some_and(|fact| fact.role == node.role && fact.passed())
            })
            && self.nodes.values().all(NodeFact::passed);
    }

    /// Whether `(index, role)` is one of the spec's declared nodes
    pub fn expects(&self, index: u32, role: &RoleName) -> bool {
        index
            .checked_sub(1)
            .and_then(|position| self.spec.roles.get(position as usize))
            .is_some_and(|declared| declared == role)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeFact> {
        self.nodes.values().filter(|fact| fact.status == NodeStatus::Failed)
    }
}

/// Every FactData of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunTree {
    pub run_id: Uuid,
    pub assembly: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub facts: Vec<FactData>,
}

impl TestRunTree {
    pub fn new(assembly: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            assembly: assembly.into(),
            started_at: Utc::now(),
            finished_at: None,
            facts: Vec::new(),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.facts.iter().filter(|f| f.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.facts.iter().filter(|f| f.is_failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.facts.iter().filter(|f| f.is_skipped()).count()
    }

    /// 0 iff no executed spec failed
    pub fn exit_code(&self) -> i32 {
        if self.failed_count() == 0 {
            exit_codes::PASSED
        } else {
            exit_codes::FAILED
        }
    }
}

/// What a run hands back to its caller
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tree: TestRunTree,
    pub exit_code: i32,
}

impl RunReport {
    pub fn new(tree: TestRunTree) -> Self {
        let exit_code = tree.exit_code();
        Self { tree, exit_code }
    }
}

/// One parsed timeline entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogMessageInfo {
    pub node: NodeInfo,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogMessageInfo {
    pub fn format(&self) -> String {
        format!(
            "[{}]{}[{}] {}",
            protocol::format_timestamp(self.timestamp),
            self.node,
            self.level,
            self.message
        )
    }
}

/// Timeline of one node within a spec log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLog {
    pub index: u32,
    pub role: RoleName,
    pub platform: String,
    pub entries: Vec<LogMessageInfo>,
}

impl NodeLog {
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(LogMessageInfo::format).collect()
    }

    pub fn file_name(&self) -> String {
        format!("node{}__{}__{}.txt", self.index, self.role, self.platform)
    }
}

/// Finalized timeline of one spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecLog {
    pub spec_name: String,
    /// Chronological, formatted lines of every node
    pub aggregated: Vec<String>,
    pub nodes: Vec<NodeLog>,
}

impl SpecLog {
    pub fn empty(spec_name: impl Into<String>) -> Self {
        Self {
            spec_name: spec_name.into(),
            ..Self::default()
        }
    }

    pub fn entry_count(&self) -> usize {
        self.nodes.iter().map(|n| n.entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn spec() -> Spec {
        Spec::new("asm", "T", "M", vec![RoleName::new("first"), RoleName::new("second")])
    }

    #[test]
    fn test_all_success_yields_passed() {
        let start = Utc::now();
        let mut fact = FactData::new(spec(), start);
        fact.record_completion(NodeCompletion::success(1, "first".into(), "ok"), start);
        fact.record_completion(NodeCompletion::success(2, "second".into(), "ok"), start);
        fact.finalize(SpecLog::empty("T.M"), start + Duration::seconds(2));

        assert!(fact.passed);
        assert!(fact.nodes.values().all(NodeFact::passed));
        assert_eq!(fact.elapsed_ms, 2000);
    }

    #[test]
    fn test_one_failure_fails_the_spec() {
        let start = Utc::now();
        let mut fact = FactData::new(spec(), start);
        fact.record_completion(NodeCompletion::success(1, "first".into(), "ok"), start);
        fact.record_completion(NodeCompletion::failure(2, "second".into(), "boom", vec![]), start);
        fact.finalize(SpecLog::empty("T.M"), start);

        assert!(!fact.passed);
        assert!(fact.is_failed());
        assert_eq!(fact.failed_nodes().count(), 1);
    }

    #[test]
    fn test_missing_node_fails_the_spec() {
        let start = Utc::now();
        let mut fact = FactData::new(spec(), start);
        fact.record_completion(NodeCompletion::success(1, "first".into(), "ok"), start);
        fact.finalize(SpecLog::empty("T.M"), start);

        assert!(!fact.passed);
    }

    #[test]
    fn test_slots_outside_the_declared_nodes_do_not_count() {
        let start = Utc::now();
        let mut fact = FactData::new(spec(), start);
        fact.record_completion(NodeCompletion::success(1, "first".into(), "ok"), start);
        fact.record_completion(NodeCompletion::success(3, "ghost".into(), "ok"), start);
        fact.finalize(SpecLog::empty("T.M"), start);
        assert!(!fact.passed);

        let mut fact = FactData::new(spec(), start);
        fact.record_completion(NodeCompletion::success(1, "first".into(), "ok"), start);
        fact.record_completion(NodeCompletion::success(2, "ghost".into(), "ok"), start);
        fact.finalize(SpecLog::empty("T.M"), start);
        assert!(!fact.passed);
    }

    #[test]
    fn test_expects_matches_index_and_role() {
        let fact = FactData::new(spec(), Utc::now());
        assert!(fact.expects(1, &RoleName::new("first")));
        assert!(fact.expects(2, &RoleName::new("second")));
        assert!(!fact.expects(0, &RoleName::new("first")));
        assert!(!fact.expects(2, &RoleName::new("first")));
        assert!(!fact.expects(3, &RoleName::new("ghost")));
    }

    #[test]
    fn test_failure_is_sticky_and_duplicates_are_ignored() {
        let start = Utc::now();
        let mut fact = FactData::new(spec(), start);
        let failure = FailureDetail::new("Error", "boom");

        assert!(fact
            .record_completion(NodeCompletion::success(1, "first".into(), "ok"), start)
            .is_some());
        assert!(fact
            .record_completion(NodeCompletion::success(1, "first".into(), "ok"), start)
            .is_none());

        let flipped = fact
            .record_completion(NodeCompletion::failure(1, "first".into(), "exit 1", vec![failure.clone()]), start)
            .unwrap();
        assert_eq!(flipped.status, NodeStatus::Failed);

        assert!(fact
            .record_completion(NodeCompletion::success(1, "first".into(), "ok"), start)
            .is_none());
        assert!(fact
            .record_completion(NodeCompletion::failure(1, "first".into(), "exit 1", vec![failure]), start)
            .is_none());

        let slot = &fact.nodes[&1];
        assert_eq!(slot.status, NodeStatus::Failed);
        assert_eq!(slot.failures.len(), 1);
        assert_eq!(slot.messages, vec!["ok".to_string(), "exit 1".to_string()]);
    }

    #[test]
    fn test_skipped_spec_is_not_a_failure() {
        let start = Utc::now();
        let mut fact = FactData::new(spec().with_skip_reason("not today"), start);
        fact.record_skipped(1, "first".into(), "not today");
        fact.record_skipped(2, "second".into(), "not today");
        fact.finalize(SpecLog::empty("T.M"), start);

        assert!(!fact.passed);
        assert!(!fact.is_failed());

        let mut tree = TestRunTree::new("asm");
        tree.facts.push(fact);
        assert_eq!(tree.skipped_count(), 1);
        assert_eq!(tree.exit_code(), exit_codes::PASSED);
    }

    #[test]
    fn test_run_exit_code_reflects_failures() {
        let start = Utc::now();
        let mut failed = FactData::new(spec(), start);
        failed.finalize(SpecLog::empty("T.M"), start);

        let mut tree = TestRunTree::new("asm");
        tree.facts.push(failed);
        let report = RunReport::new(tree);
        assert_eq!(report.exit_code, exit_codes::FAILED);
        assert_eq!(report.tree.failed_count(), 1);
    }
}
