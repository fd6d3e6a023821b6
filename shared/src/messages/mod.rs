//! Messages exchanged across the runner/node process boundary
//!
//! - `discovery`: what an assembly prints for `--list-specs`
//! - `launch`: the argument contract the runner uses to start a node

pub mod discovery;
pub mod launch;

pub use discovery::{DiscoveryError, DiscoveryErrorKind, DiscoveryReport};
pub use launch::{exit_codes, NodeLaunchArgs};
