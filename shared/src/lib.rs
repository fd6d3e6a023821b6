//! Shared types for the multi-node test runner
//!
//! Contains only what both sides of the process boundary must agree on: the
//! text wire protocol node processes stream to the runner, the node launch
//! argument contract, the discovery report, and the correlation types
//! (spec, role, node) every component keys on.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod protocol;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Runner -> node launch contract
    exit_codes, NodeLaunchArgs,

    // Node assembly -> runner discovery output
    DiscoveryError, DiscoveryErrorKind, DiscoveryReport,
};
