//! Test fixtures and data for orchestrator tests
//!
//! Spec shapes mirror a typical sample assembly: a passing spec, a spec with
//! one failing node, a skipped spec and one whose configuration errored.

use shared::{DiscoveryError, DiscoveryErrorKind, DiscoveryReport, RoleName, Spec, ERRORED_SKIP_REASON};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const ASSEMBLY: &'static str = "./sample-specs";
    pub const TYPE_NAME: &'static str = "SampleTests";

    pub fn roles() -> Vec<RoleName> {
        vec![RoleName::new("first"), RoleName::new("second")]
    }

    pub fn spec(method: &str) -> Spec {
        Spec::new(Self::ASSEMBLY, Self::TYPE_NAME, method, Self::roles())
    }

    pub fn skipped_spec() -> Spec {
        Self::spec("Skipped").with_skip_reason("not today")
    }

    pub fn errored_spec() -> Spec {
        Spec::new(Self::ASSEMBLY, "BadConfigTests", "BadConfig", vec![]).with_skip_reason(ERRORED_SKIP_REASON)
    }

    pub fn config_error() -> DiscoveryError {
        DiscoveryError {
            type_name: "BadConfigTests".to_string(),
            method_name: Some("BadConfig".to_string()),
            kind: DiscoveryErrorKind::ConfigurationConstruction,
            message: "config constructor failed".to_string(),
        }
    }

    pub fn report(specs: Vec<Spec>) -> DiscoveryReport {
        DiscoveryReport {
            assembly: Self::ASSEMBLY.to_string(),
            specs,
            errors: Vec::new(),
        }
    }

    /// Every scenario of the sample assembly
    pub fn sample_report() -> DiscoveryReport {
        DiscoveryReport {
            assembly: Self::ASSEMBLY.to_string(),
            specs: vec![
                Self::spec("Sample"),
                Self::spec("OneNodeFailed"),
                Self::skipped_spec(),
                Self::errored_spec(),
            ],
            errors: vec![Self::config_error()],
        }
    }
}
