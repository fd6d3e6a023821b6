//! Node-side library for multi-node spec assemblies
//!
//! An assembly declares its test types and configs in a [`SpecRegistry`] and
//! calls [`run_host`] from `main`. The runner launches that executable once to
//! list specs and then once per node of every spec it runs.

pub mod catalog;
pub mod context;
pub mod error;
pub mod host;

// Re-export main types
pub use catalog::{
    resolve_roles, ArgValue, MultiNodeConfig, ParamKind, ResolvedSpec, SpecMethod, SpecRegistry, TypeRef,
    CONFIG_BASE_TYPE,
};
pub use context::{NodeContext, RunnerLink};
pub use error::{CatalogError, NodeError, NodeResult};
pub use host::{run_host, run_with_args, NodeHostArgs};
