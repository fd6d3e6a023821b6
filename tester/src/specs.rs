//! Sample spec assembly
//!
//! Every spec runs on two nodes, `first` and `second`. `BadConfigTests` has a
//! config whose constructor fails, so discovery reports it as errored.

use anyhow::bail;
use std::time::Duration;

use node::{MultiNodeConfig, NodeContext, SpecRegistry};
use shared::RoleName;

pub const SAMPLE_TYPE: &str = "SampleTests";
pub const BAD_CONFIG_TYPE: &str = "BadConfigTests";

/// Two-role config; `Myself` resolves to whichever role a node plays
pub struct TwoRoleConfig;

impl MultiNodeConfig for TwoRoleConfig {
    fn role_members(&self) -> Vec<(&'static str, RoleName)> {
        vec![
            ("First", RoleName::new("first")),
            ("Second", RoleName::new("second")),
            ("Myself", RoleName::new("first")),
        ]
    }
}

async fn sample(ctx: NodeContext) -> anyhow::Result<()> {
    ctx.log(format!("hello from {} on {}", ctx.role(), ctx.node_host())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.log(format!("{} of {} nodes done", ctx.index(), ctx.node_count())).await;
    Ok(())
}

async fn failed(ctx: NodeContext) -> anyhow::Result<()> {
    ctx.log("about to fail").await;
    bail!("{} failed on purpose", ctx.role())
}

async fn one_node_failed(ctx: NodeContext) -> anyhow::Result<()> {
    if ctx.role().name() == "second" {
        ctx.warn("second node gives up").await;
        bail!("second node failed on purpose");
    }
    ctx.log("first node is fine").await;
    Ok(())
}

async fn never_runs(_ctx: NodeContext) -> anyhow::Result<()> {
    bail!("skipped specs are never launched")
}

/// Registry of the sample assembly
pub fn registry() -> SpecRegistry {
    let mut registry = SpecRegistry::new();

    let config = registry
        .config_type("TwoRoleConfig")
        .config_constructor(vec![], |_| Ok(Box::new(TwoRoleConfig)))
        .build();
    registry
        .test_type(SAMPLE_TYPE)
        .constructor([config])
        .multi_node_fact("Sample", sample)
        .multi_node_fact("Failed", failed)
        .multi_node_fact("OneNodeFailed", one_node_failed)
        .skipped_fact("Skipped", "skipped on purpose", never_runs)
        .build();

    let bad_config = registry
        .config_type("ThrowingConfig")
        .config_constructor(vec![], |_| bail!("config constructor failed"))
        .build();
    registry
        .test_type(BAD_CONFIG_TYPE)
        .constructor([bad_config])
        .multi_node_fact("BadConfig", sample)
        .build();

    registry
}
