//! Node launch argument contract
//!
//! The runner renders these into the command line of every node process; the
//! node host parses the same flags back with clap.

use serde::{Deserialize, Serialize};

/// Documented node process exit codes
pub mod exit_codes {
    /// Spec logic passed on this node
    pub const PASSED: i32 = 0;
    /// Spec logic failed on this node
    pub const FAILED: i32 = 1;
    /// Unhandled error in the node host itself (128 + SIGABRT)
    pub const HOST_ERROR: i32 = 134;
}

pub const ARG_LIST_SPECS: &str = "--list-specs";
pub const ARG_ASSEMBLY: &str = "--assembly";
pub const ARG_SPEC_TYPE: &str = "--spec-type";
pub const ARG_SPEC_METHOD: &str = "--spec-method";
pub const ARG_NODE_COUNT: &str = "--node-count";
pub const ARG_SERVER_HOST: &str = "--server-host";
pub const ARG_NODE_HOST: &str = "--node-host";
pub const ARG_NODE_INDEX: &str = "--node-index";
pub const ARG_ROLE: &str = "--role";
pub const ARG_LISTEN_ADDRESS: &str = "--listen-address";
pub const ARG_LISTEN_PORT: &str = "--listen-port";
pub const ARG_LOG_LEVEL: &str = "--log-level";

/// Everything a node process needs to run its share of a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLaunchArgs {
    pub assembly: String,
    pub spec_type: String,
    pub spec_method: String,
    pub node_count: u32,
    pub server_host: String,
    pub node_host: String,
    /// 0-based; the node host converts back to the 1-based index on arrival
    pub node_index: u32,
    pub role: String,
    /// Address of the runner's TCP ingestion server
    pub listen_address: String,
    pub listen_port: u16,
    pub log_level: String,
}

impl NodeLaunchArgs {
    /// Convert to command-line arguments
    pub fn to_args(&self) -> Vec<String> {
        vec![
            ARG_ASSEMBLY.to_string(),
            self.assembly.clone(),
            ARG_SPEC_TYPE.to_string(),
            self.spec_type.clone(),
            ARG_SPEC_METHOD.to_string(),
            self.spec_method.clone(),
            ARG_NODE_COUNT.to_string(),
            self.node_count.to_string(),
            ARG_SERVER_HOST.to_string(),
            self.server_host.clone(),
            ARG_NODE_HOST.to_string(),
            self.node_host.clone(),
            ARG_NODE_INDEX.to_string(),
            self.node_index.to_string(),
            ARG_ROLE.to_string(),
            self.role.clone(),
            ARG_LISTEN_ADDRESS.to_string(),
            self.listen_address.clone(),
            ARG_LISTEN_PORT.to_string(),
            self.listen_port.to_string(),
            ARG_LOG_LEVEL.to_string(),
            self.log_level.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_args_pairs_every_flag_with_its_value() {
        let args = NodeLaunchArgs {
            assembly: "/tmp/sample-specs".to_string(),
            spec_type: "SampleTests".to_string(),
            spec_method: "Sample".to_string(),
            node_count: 2,
            server_host: "127.0.0.1".to_string(),
            node_host: "127.0.0.1".to_string(),
            node_index: 1,
            role: "second".to_string(),
            listen_address: "127.0.0.1".to_string(),
            listen_port: 40123,
            log_level: "info".to_string(),
        }
        .to_args();

        assert_eq!(args.len(), 22);
        let pos = args.iter().position(|a| a == ARG_NODE_INDEX).unwrap();
        assert_eq!(args[pos + 1], "1");
        let pos = args.iter().position(|a| a == ARG_LISTEN_PORT).unwrap();
        assert_eq!(args[pos + 1], "40123");
    }
}
