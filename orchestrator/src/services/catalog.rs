//! Spec catalog backed by the assembly executable itself
//!
//! The assembly is run once with `--list-specs`; it prints its discovery
//! report as JSON on stdout.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use shared::messages::launch::{ARG_ASSEMBLY, ARG_LIST_SPECS};
use shared::{process_debug, process_info, DiscoveryReport, ProcessId};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::SpecCatalog;

#[derive(Debug, Default, Clone)]
pub struct ProcessSpecCatalog;

impl ProcessSpecCatalog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpecCatalog for ProcessSpecCatalog {
    async fn discover(&self, assembly: &str) -> OrchestratorResult<DiscoveryReport> {
        let failed = |message: String| OrchestratorError::DiscoveryFailed {
            assembly: assembly.to_string(),
            message,
        };

        process_debug!(ProcessId::current(), "🔍 Listing specs of {}", assembly);
        let output = Command::new(assembly)
            .arg(ARG_LIST_SPECS)
            .arg(ARG_ASSEMBLY)
            .arg(assembly)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            return Err(failed(format!(
                "exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = DiscoveryReport::from_json(stdout.trim()).map_err(|e| failed(e.to_string()))?;

        process_info!(
            ProcessId::current(),
            "🔍 Discovered {} specs ({} discovery errors) in {}",
            report.specs.len(),
            report.errors.len(),
            assembly
        );
        Ok(report)
    }
}
