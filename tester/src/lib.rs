//! End-to-end harness for the multi-node runner
//!
//! ## Main Interface
//!
//! [`specs::registry`] is the sample spec assembly: one passing spec, two
//! failing ones, a skipped one and a type whose config constructor throws. The
//! `sample-specs` binary serves it through the node host.
//!
//! [`scenarios::run_assembly`] drives the real orchestrator against such an
//! executable and [`assertions::RunAssertions`] checks the outcome:
//!
//! ```rust,no_run
//! use tester::{run_assembly, sample_expectations, RunAssertions};
//!
//! # async fn demo(assembly: &str, output: &std::path::Path) -> anyhow::Result<()> {
//! let report = run_assembly(assembly, output).await?;
//! let results = RunAssertions::new(&report).check_all(&sample_expectations());
//! assert!(results.iter().all(|r| r.success));
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod scenarios;
pub mod specs;

pub use assertions::{AssertionResult, RunAssertions};
pub use scenarios::{run_assembly, run_with_config, sample_expectations, Expected, ExpectedOutcome};
