//! Run configuration
//!
//! Built fluently by the binary from its CLI arguments, or directly by tests.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::process_manager::{DEFAULT_KILL_GRACE, DEFAULT_NODE_TIMEOUT};

/// Environment variable overriding where failed spec logs are copied
pub const FAILED_SPECS_ENV: &str = "FAILED_SPECS_LOGS";
pub const FAILED_SPECS_DIR_NAME: &str = "FAILED_SPECS_LOGS";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:0";

/// Which human-facing reporter renders the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReporterKind {
    #[default]
    Console,
    #[value(name = "teamcity")]
    TeamCity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub assembly: String,
    pub output_dir: PathBuf,
    /// `host:port`; port 0 lets the OS pick
    pub listen_address: String,
    pub reporter: ReporterKind,
    /// Substring matched against spec display names
    pub filter: Option<String>,
    pub clear_output: bool,
    pub node_timeout: Duration,
    pub kill_grace: Duration,
    failed_specs_dir: Option<PathBuf>,
    pub json_store: bool,
    pub print_timeline: bool,
    pub log_level: String,
    pub server_host: String,
    pub node_host: String,
}

impl RunnerConfig {
    pub fn new(assembly: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            assembly: assembly.into(),
            output_dir: output_dir.into(),
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            reporter: ReporterKind::default(),
            filter: None,
            clear_output: false,
            node_timeout: DEFAULT_NODE_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            failed_specs_dir: None,
            json_store: false,
            print_timeline: false,
            log_level: "info".to_string(),
            server_host: "localhost".to_string(),
            node_host: "localhost".to_string(),
        }
    }

    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    pub fn with_reporter(mut self, reporter: ReporterKind) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_clear_output(mut self, clear: bool) -> Self {
        self.clear_output = clear;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_failed_specs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.failed_specs_dir = Some(dir.into());
        self
    }

    pub fn with_json_store(mut self, enabled: bool) -> Self {
        self.json_store = enabled;
        self
    }

    pub fn with_print_timeline(mut self, enabled: bool) -> Self {
        self.print_timeline = enabled;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_hosts(mut self, server_host: impl Into<String>, node_host: impl Into<String>) -> Self {
        self.server_host = server_host.into();
        self.node_host = node_host.into();
        self
    }

    /// Apply `FAILED_SPECS_LOGS` unless a directory was set explicitly
    pub fn with_env_overrides(mut self) -> Self {
        if self.failed_specs_dir.is_none() {
            if let Ok(dir) = std::env::var(FAILED_SPECS_ENV) {
                if !dir.trim().is_empty() {
                    self.failed_specs_dir = Some(PathBuf::from(dir));
                }
            }
        }
        self
    }

    /// Where failed spec logs are copied
    pub fn failed_specs_dir(&self) -> PathBuf {
        self.failed_specs_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(FAILED_SPECS_DIR_NAME))
    }

    /// Output directory of one spec
    pub fn spec_dir(&self, display_name: &str) -> PathBuf {
        self.output_dir.join(sanitize_file_name(display_name))
    }

    pub fn matches_filter(&self, display_name: &str) -> bool {
        match &self.filter {
            Some(filter) => display_name.contains(filter.as_str()),
            None => true,
        }
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.assembly.trim().is_empty() {
            return Err(OrchestratorError::config("assembly", "an assembly path is required"));
        }
        if !self.listen_address.contains(':') {
            return Err(OrchestratorError::config(
                "listen_address",
                format!("expected host:port, got '{}'", self.listen_address),
            ));
        }
        if self.node_timeout.is_zero() {
            return Err(OrchestratorError::config("node_timeout", "must be greater than zero"));
        }
        if self.failed_specs_dir() == self.output_dir {
            return Err(OrchestratorError::config(
                "failed_specs_dir",
                "must differ from the output directory",
            ));
        }
        Ok(())
    }
}

/// Replace characters that are not portable in file names
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
