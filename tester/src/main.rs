//! E2E Test Runner
//!
//! Runs the sample scenario end to end:
//! - runs the multi-node runner against the sample spec assembly
//! - checks every spec outcome and the written logs
//! - exits non-zero when any check fails

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;

use shared::ProcessId;
use tester::{run_assembly, sample_expectations, RunAssertions};

#[derive(Parser)]
#[command(name = "tester")]
#[command(about = "E2E checks for the multi-node runner")]
struct Args {
    /// Spec assembly to run (defaults to the sample-specs binary next to this one)
    #[arg(long)]
    assembly: Option<PathBuf>,

    /// Output directory for the run
    #[arg(long, default_value = "./e2e-results")]
    output: PathBuf,

    /// Test timeout in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Enable verbose tracing output
    #[arg(long)]
    verbose: bool,
}

fn default_assembly() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", exe.display()))?;
    Ok(dir.join(format!("sample-specs{}", std::env::consts::EXE_SUFFIX)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    ProcessId::init_runner();
    init_tester_tracing(args.verbose);

    let assembly = match args.assembly {
        Some(path) => path,
        None => default_assembly()?,
    };
    tracing::info!("🧪 Running {} into {}", assembly.display(), args.output.display());

    let run = timeout(
        Duration::from_secs(args.timeout_secs),
        run_assembly(&assembly.display().to_string(), &args.output),
    )
    .await;

    let report = match run {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            tracing::error!("❌ Run aborted: {}", e);
            return Err(e);
        }
        Err(_) => {
            tracing::error!("⏰ Run timed out after {}s", args.timeout_secs);
            anyhow::bail!("test timeout");
        }
    };

    let assertions = RunAssertions::new(&report);
    let mut results = vec![assertions.assert_exit_code(shared::exit_codes::FAILED)];
    results.extend(assertions.check_all(&sample_expectations()));
    results.push(assertions.assert_logs_written(&args.output, "SampleTests.Sample"));

    let mut failures = 0;
    for result in &results {
        if result.success {
            tracing::info!("✅ {}", result.message);
        } else {
            failures += 1;
            tracing::error!("❌ {} {}", result.message, result.details.as_deref().unwrap_or_default());
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} checks failed", results.len());
    }
    tracing::info!("🏁 E2E checks passed");
    Ok(())
}

fn init_tester_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("tester=debug,orchestrator=debug,info")
    } else {
        EnvFilter::new("tester=info,orchestrator=info,warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
