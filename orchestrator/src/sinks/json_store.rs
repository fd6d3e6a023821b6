//! JSON store of the whole run tree
//!
//! Written once when the run closes, including every spec's per-node
//! timeline, and readable back with [`JsonStoreSink::load`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared::{process_info, LogLevel, ProcessId, Spec};

use crate::core::results::{FactData, NodeResult, TestRunTree};
use crate::error::OrchestratorResult;
use crate::traits::{FileSystem, ReportingSink, RunContext};

pub const STORE_FILE_NAME: &str = "test-run.json";

pub struct JsonStoreSink {
    file_system: Arc<dyn FileSystem>,
}

impl JsonStoreSink {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self { file_system }
    }

    pub fn store_path(output_dir: &Path) -> PathBuf {
        output_dir.join(STORE_FILE_NAME)
    }

    /// Read a previously stored run tree
    pub async fn load(file_system: &dyn FileSystem, path: &Path) -> OrchestratorResult<TestRunTree> {
        let json = file_system.read_file(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[async_trait]
impl ReportingSink for JsonStoreSink {
    fn name(&self) -> String {
        "json-store".to_string()
    }

    async fn open(&mut self, run: &RunContext) -> anyhow::Result<()> {
        self.file_system.create_dir_all(&run.output_dir).await?;
        Ok(())
    }

    async fn begin_spec(&mut self, _spec: &Spec) -> anyhow::Result<()> {
        Ok(())
    }

    async fn node_result(&mut self, _spec: &Spec, _result: &NodeResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn end_spec(&mut self, _fact: &FactData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn log_runner_message(&mut self, _message: &str, _source: &str, _level: LogLevel) -> anyhow::Result<()> {
        Ok(())
    }

    async fn offer(&mut self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn exit_code(&self, _tree: &TestRunTree) -> Option<i32> {
        None
    }

    async fn close(&mut self, run: &RunContext, tree: &TestRunTree) -> anyhow::Result<()> {
        let path = Self::store_path(&run.output_dir);
        let json = serde_json::to_string_pretty(tree)?;
        self.file_system.write_file(&path, &json).await?;
        process_info!(ProcessId::current(), "💾 Stored run {} at {}", tree.run_id, path.display());
        Ok(())
    }
}
