//! Node host entry point
//!
//! An assembly's `main` hands its [`SpecRegistry`] to [`run_host`]. With
//! `--list-specs` the host prints the discovery report as JSON on stdout;
//! otherwise it runs one node of one spec and exits with one of the
//! [`exit_codes`].

use clap::Parser;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

use shared::logging::{self, log_error};
use shared::protocol::{self, FailureDetail};
use shared::{exit_codes, process_info, LogLevel, ProcessId, RoleName};

use crate::catalog::SpecRegistry;
use crate::context::{NodeContext, RunnerLink};
use crate::error::{NodeError, NodeResult};

const CONNECT_ATTEMPTS: u32 = 20;

#[derive(Parser, Debug, Clone)]
#[command(name = "node-host")]
#[command(about = "Runs one node of a multi-node spec")]
pub struct NodeHostArgs {
    /// Print every discoverable spec as JSON and exit
    #[arg(long)]
    pub list_specs: bool,

    /// Assembly identity reported back to the runner (defaults to this executable)
    #[arg(long)]
    pub assembly: Option<String>,

    #[arg(long)]
    pub spec_type: Option<String>,

    #[arg(long)]
    pub spec_method: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub node_count: u32,

    #[arg(long, default_value = "127.0.0.1")]
    pub server_host: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub node_host: String,

    /// 0-based index of this node
    #[arg(long, default_value_t = 0)]
    pub node_index: u32,

    #[arg(long)]
    pub role: Option<String>,

    /// Runner ingestion address
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_address: String,

    /// Runner ingestion port; 0 runs without a runner link
    #[arg(long, default_value_t = 0)]
    pub listen_port: u16,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Parse the process arguments and run; returns the process exit code
pub async fn run_host(registry: SpecRegistry) -> i32 {
    match NodeHostArgs::try_parse() {
        Ok(args) => run_with_args(&registry, args).await,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::HOST_ERROR
            } else {
                exit_codes::PASSED
            };
            let _ = e.print();
            code
        }
    }
}

pub async fn run_with_args(registry: &SpecRegistry, args: NodeHostArgs) -> i32 {
    let assembly = args.assembly.clone().unwrap_or_else(current_assembly);

    if args.list_specs {
        return list_specs(registry, &assembly);
    }

    let index = args.node_index + 1;
    let role = args.role.clone();
    match execute(registry, &assembly, args).await {
        Ok(code) => code,
        Err(e) => {
            log_error(ProcessId::current(), "Node host", &e);
            // Surface the host error as the node's failure when it can be attributed.
            if let Some(role) = role {
                let failure = FailureDetail::new("NodeHostError", e.to_string());
                println!(
                    "{}",
                    protocol::node_fail(index, &RoleName::new(role), "", &[failure])
                );
            }
            exit_codes::HOST_ERROR
        }
    }
}

fn current_assembly() -> String {
    std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_default()
}

fn list_specs(registry: &SpecRegistry, assembly: &str) -> i32 {
    match registry.discover(assembly).to_json() {
        Ok(json) => {
            println!("{json}");
            exit_codes::PASSED
        }
        Err(e) => {
            eprintln!("failed to render discovery report: {e}");
            exit_codes::HOST_ERROR
        }
    }
}

async fn execute(registry: &SpecRegistry, assembly: &str, args: NodeHostArgs) -> NodeResult<i32> {
    let spec_type = args
        .spec_type
        .ok_or_else(|| NodeError::arguments("--spec-type is required"))?;
    let spec_method = args
        .spec_method
        .ok_or_else(|| NodeError::arguments("--spec-method is required"))?;
    let role = args
        .role
        .map(RoleName::new)
        .ok_or_else(|| NodeError::arguments("--role is required"))?;
    if args.node_index >= args.node_count {
        return Err(NodeError::arguments(format!(
            "node index {} out of range for {} nodes",
            args.node_index, args.node_count
        )));
    }

    let index = args.node_index + 1;
    let process_id = ProcessId::init_node(index, role.name());
    logging::init_tracing_with_level(Some(&args.log_level));

    let resolved = registry.resolve(assembly, &spec_type, &spec_method)?;
    if !resolved.spec.roles.contains(&role) {
        return Err(NodeError::UnknownRole {
            spec: resolved.spec.display_name(),
            role: role.to_string(),
        });
    }

    let runner = if args.listen_port == 0 {
        RunnerLink::disconnected()
    } else {
        let address = format!("{}:{}", args.listen_address, args.listen_port);
        RunnerLink::connect(&address, CONNECT_ATTEMPTS).await?
    };

    let context = NodeContext::new(
        resolved.spec.clone(),
        index,
        role,
        args.server_host,
        args.node_host,
        runner.clone(),
    );
    let display_name = resolved.spec.display_name();
    process_info!(process_id, "Running {} as node {} of {}", display_name, index, args.node_count);
    context
        .runner_log(
            LogLevel::Debug,
            &format!("connected, running {display_name} as node {index} of {}", args.node_count),
        )
        .await;

    let outcome = AssertUnwindSafe(resolved.method.run(context.clone()))
        .catch_unwind()
        .await;

    let code = match outcome {
        Ok(Ok(())) => {
            context.report_pass().await;
            exit_codes::PASSED
        }
        Ok(Err(error)) => {
            context.report_fail(&[failure_from_error(&error)]).await;
            exit_codes::FAILED
        }
        Err(panic) => {
            let failure = FailureDetail::new("panic", panic_message(&*panic));
            context.report_fail(&[failure]).await;
            exit_codes::FAILED
        }
    };

    runner.close().await;
    Ok(code)
}

/// Failure detail for an error returned by a spec body; the cause chain
/// stands in for a stack trace
pub fn failure_from_error(error: &anyhow::Error) -> FailureDetail {
    let causes: Vec<String> = error
        .chain()
        .skip(1)
        .enumerate()
        .map(|(depth, cause)| format!("{depth}: {cause}"))
        .collect();

    FailureDetail::new("Error", error.to_string()).with_stack_trace(causes.join("\n"))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
