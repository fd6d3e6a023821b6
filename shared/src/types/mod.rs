//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();
static UNINITIALIZED_PROCESS_ID: ProcessId = ProcessId::Runner;

/// Skip reason attached to a spec whose configuration could not be constructed
pub const ERRORED_SKIP_REASON: &str = "ERRORED";

/// Member name of the pseudo-role that refers to the declaring node itself
pub const MYSELF_MEMBER: &str = "Myself";

/// Process identifier for any component in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// The orchestrating runner process (singleton)
    Runner,
    /// A node process with its 1-based index and role
    Node { index: u32, role: String },
}

impl ProcessId {
    /// Initialize the global process ID for the runner
    pub fn init_runner() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Runner)
    }

    /// Initialize the global process ID for a node process
    pub fn init_node(index: u32, role: &str) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Node {
            index,
            role: role.to_string(),
        })
    }

    /// Get the global process ID, defaulting to the runner when not initialized
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get().unwrap_or(&UNINITIALIZED_PROCESS_ID)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Runner => write!(f, "runner"),
            ProcessId::Node { index, role } => write!(f, "node{index}:{role}"),
        }
    }
}

/// A named participant identity within a spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One discovered multi-node test declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spec {
    /// Path of the assembly (node host executable) declaring the spec
    pub assembly: String,
    pub type_name: String,
    pub method_name: String,
    /// Ordered, de-duplicated roles; position + 1 is the node index
    pub roles: Vec<RoleName>,
    pub skip_reason: Option<String>,
}

impl Spec {
    pub fn new(
        assembly: impl Into<String>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        roles: Vec<RoleName>,
    ) -> Self {
        Self {
            assembly: assembly.into(),
            type_name: type_name.into(),
            method_name: method_name.into(),
            roles,
            skip_reason: None,
        }
    }

    /// Attach a skip reason (the only mutation a spec ever sees)
    pub fn with_skip_reason(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn display_name(&self) -> String {
        format!("{}.{}", self.type_name, self.method_name)
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    pub fn is_errored(&self) -> bool {
        self.skip_reason.as_deref() == Some(ERRORED_SKIP_REASON)
    }

    pub fn node_count(&self) -> u32 {
        self.roles.len() as u32
    }

    /// One NodeTest per role, indexed from 1 in role order
    pub fn node_tests(&self) -> Vec<NodeTest> {
        self.roles
            .iter()
            .enumerate()
            .map(|(position, role)| NodeTest {
                index: position as u32 + 1,
                role: role.clone(),
                spec: self.clone(),
            })
            .collect()
    }
}

/// The pairing of a spec with one of its roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTest {
    /// 1-based node index
    pub index: u32,
    pub role: RoleName,
    pub spec: Spec,
}

impl NodeTest {
    /// The 0-based index handed to the node process on its command line
    pub fn process_index(&self) -> u32 {
        self.index - 1
    }

    pub fn node_info(&self) -> NodeInfo {
        NodeInfo::new(self.index, self.role.clone(), self.spec.display_name())
    }
}

/// Correlation key attached to every log line of a node.
///
/// Two values with the same index refer to the same node within one spec run,
/// so equality, hashing and ordering only look at `index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub index: u32,
    pub role: RoleName,
    pub platform: String,
    pub spec_name: String,
}

impl NodeInfo {
    pub fn new(index: u32, role: RoleName, spec_name: impl Into<String>) -> Self {
        Self {
            index,
            role,
            platform: current_platform().to_string(),
            spec_name: spec_name.into(),
        }
    }

    /// File name of this node's log within a spec output directory
    pub fn log_file_name(&self) -> String {
        format!("node{}__{}__{}.txt", self.index, self.role, self.platform)
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for NodeInfo {}

impl Hash for NodeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl PartialOrd for NodeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[NODE{}:{}]", self.index, self.role)
    }
}

/// Platform tag recorded with every node
pub fn current_platform() -> &'static str {
    std::env::consts::OS
}

/// Severity inferred for a log line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" | "TRACE" | "VERBOSE" => Ok(LogLevel::Debug),
            "INFO" | "INFORMATION" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warning),
            "ERROR" | "FATAL" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}
