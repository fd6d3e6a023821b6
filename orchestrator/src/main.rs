//! Main entry point for the multi-node runner binary
//!
//! Wires the real service implementations into the orchestrator, runs one
//! assembly and exits with the run's exit code.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use orchestrator::services::{ProcessSpecCatalog, RealFileSystem, RealProcessManager};
use orchestrator::sinks::{ConsoleSink, JsonStoreSink, TeamCitySink};
use orchestrator::{FileSystem, Orchestrator, ReporterKind, RunnerConfig};
use shared::{exit_codes, logging, process_debug, LogLevel, ProcessId};

/// Runs the multi-node specs of a test assembly
#[derive(Parser)]
#[command(name = "multinode-runner")]
#[command(about = "Runs multi-node specs as cooperating processes and aggregates their logs")]
pub struct Args {
    /// Path to the spec assembly executable
    #[arg(long)]
    pub assembly: String,

    /// Output directory for spec logs and reports
    #[arg(long, default_value = "./test-results")]
    pub output: PathBuf,

    /// Ingestion listener address (port 0 = OS-assigned)
    #[arg(long, default_value = "127.0.0.1:0")]
    pub listen_address: String,

    /// Reporter rendering the run
    #[arg(long, value_enum, default_value_t = ReporterKind::Console)]
    pub reporter: ReporterKind,

    /// Only run specs whose display name contains this text
    #[arg(long)]
    pub filter: Option<String>,

    /// Empty the output directory before running
    #[arg(long)]
    pub clear_output: bool,

    /// Per-node wait ceiling in seconds
    #[arg(long, default_value = "300")]
    pub node_timeout_secs: u64,

    /// Grace period between SIGTERM and kill in seconds
    #[arg(long, default_value = "5")]
    pub kill_grace_secs: u64,

    /// Where logs of failed specs are copied (default: <output>/FAILED_SPECS_LOGS)
    #[arg(long)]
    pub failed_specs_dir: Option<PathBuf>,

    /// Store the run tree as JSON in the output directory
    #[arg(long)]
    pub json_store: bool,

    /// Print each spec timeline to the console after it ends
    #[arg(long)]
    pub print_timeline: bool,

    /// Host name handed to nodes as the server host
    #[arg(long, default_value = "localhost")]
    pub server_host: String,

    /// Host name handed to nodes as their own host
    #[arg(long, default_value = "localhost")]
    pub node_host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    fn into_config(self) -> RunnerConfig {
        let mut config = RunnerConfig::new(self.assembly, self.output)
            .with_listen_address(self.listen_address)
            .with_reporter(self.reporter)
            .with_filter(self.filter)
            .with_clear_output(self.clear_output)
            .with_node_timeout(Duration::from_secs(self.node_timeout_secs))
            .with_kill_grace(Duration::from_secs(self.kill_grace_secs))
            .with_json_store(self.json_store)
            .with_print_timeline(self.print_timeline)
            .with_hosts(self.server_host, self.node_host)
            .with_log_level(self.log_level);
        if let Some(dir) = self.failed_specs_dir {
            config = config.with_failed_specs_dir(dir);
        }
        config.with_env_overrides()
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let process_id = ProcessId::init_runner();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(process_id, &format!("multinode-runner for {}", args.assembly));

    let config = args.into_config();
    process_debug!(process_id, "Configuration: {:?}", config);

    let file_system: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let process_manager = RealProcessManager::new()
        .with_node_timeout(config.node_timeout)
        .with_kill_grace(config.kill_grace);

    let reporter = config.reporter;
    let json_store = config.json_store;
    let mut orchestrator = Orchestrator::new(config, ProcessSpecCatalog::new(), process_manager, file_system.clone());
    orchestrator = match reporter {
        ReporterKind::Console => orchestrator.with_sink(Box::new(ConsoleSink::stdout().with_min_level(LogLevel::Warning))),
        ReporterKind::TeamCity => orchestrator.with_sink(Box::new(TeamCitySink::stdout())),
    };
    if json_store {
        orchestrator = orchestrator.with_sink(Box::new(JsonStoreSink::new(file_system)));
    }

    // Ctrl+C cancels the run; the active spec is still ended and sinks closed
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
                cancel.cancel();
            }
            Err(err) => logging::log_error(ProcessId::current(), "Signal handling", &err),
        }
    });

    let code = match orchestrator.run().await {
        Ok(report) => report.exit_code,
        Err(e) => {
            logging::log_error(process_id, "Run aborted", &e);
            exit_codes::HOST_ERROR
        }
    };
    std::process::exit(code);
}
