//! Discovery report printed by an assembly for the runner

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SharedResult;
use crate::types::Spec;

/// Why a spec could not be discovered (or could only be discovered as skipped)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryErrorKind {
    /// No constructor parameter deriving from the config base type in the chain
    ConfigurationNotFound,
    /// The config constructor failed; the spec is kept as skipped "ERRORED"
    ConfigurationConstruction,
    /// Any other failure while inspecting the declaring type
    Inspection,
}

impl fmt::Display for DiscoveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryErrorKind::ConfigurationNotFound => write!(f, "configuration not found"),
            DiscoveryErrorKind::ConfigurationConstruction => write!(f, "configuration construction failed"),
            DiscoveryErrorKind::Inspection => write!(f, "inspection failed"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryError {
    pub type_name: String,
    pub method_name: Option<String>,
    pub kind: DiscoveryErrorKind,
    pub message: String,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method_name {
            Some(method) => write!(f, "{}.{}: {}: {}", self.type_name, method, self.kind, self.message),
            None => write!(f, "{}: {}: {}", self.type_name, self.kind, self.message),
        }
    }
}

/// Everything one `--list-specs` invocation found
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub assembly: String,
    pub specs: Vec<Spec>,
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    pub fn to_json(&self) -> SharedResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> SharedResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleName;

    #[test]
    fn test_report_json_keeps_errored_specs() {
        let report = DiscoveryReport {
            assembly: "./sample-specs".to_string(),
            specs: vec![Spec::new("./sample-specs", "BadConfigTests", "BadConfig", vec![])
                .with_skip_reason(crate::ERRORED_SKIP_REASON)],
            errors: vec![DiscoveryError {
                type_name: "BadConfigTests".to_string(),
                method_name: Some("BadConfig".to_string()),
                kind: DiscoveryErrorKind::ConfigurationConstruction,
                message: "boom".to_string(),
            }],
        };

        let parsed = DiscoveryReport::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
        assert!(parsed.specs[0].is_errored());
    }

    #[test]
    fn test_roles_serialize_as_plain_strings() {
        let spec = Spec::new("a", "T", "M", vec![RoleName::new("first")]);
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""roles":["first"]"#));
    }

    #[test]
    fn test_garbage_is_a_deserialization_error() {
        let err = DiscoveryReport::from_json("not json").unwrap_err();
        assert!(matches!(err, crate::SharedError::DeserializationError { .. }));
    }
}
