use crate::core::registry::RegistryError;
use thiserror::Error;

/// Why a job's parameters could not be turned into a valid configuration.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unknown parameter '{name}'{}", hint(.suggestion))]
    UnknownParameter {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Parameter '{name}' expects {expected}, got {found}")]
    WrongType {
        name: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("'{value}' is not a valid choice for '{name}' (choices: {})", .choices.join(", "))]
    UnknownChoice {
        name: &'static str,
        value: String,
        choices: Vec<String>,
    },

    #[error("Value {value} of '{name}' is outside [{}, {}]", bound(.min), bound(.max))]
    OutOfRange {
        name: &'static str,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("Parameter '{name}' depends on '{dependency}', which is not valid")]
    DependencyUnsatisfied {
        name: &'static str,
        dependency: String,
    },

    #[error("Parameter '{name}' depends on '{dependency}', which this job does not declare")]
    UnknownDependency {
        name: &'static str,
        dependency: String,
    },

    #[error("Cyclic dependency between parameters: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Parameter '{name}' holds a {found}, not a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unknown configurator kind for '{name}': {source}")]
    UnknownConfigurator {
        name: &'static str,
        source: RegistryError,
    },
}

fn hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

fn bound(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "..".to_string())
}

impl ConfigError {
    pub fn invalid(name: &'static str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            name,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let err = ConfigError::UnknownParameter {
            name: "frame".into(),
            suggestion: Some("frames".into()),
        };
        assert_eq!(err.to_string(), "Unknown parameter 'frame' (did you mean 'frames'?)");
        let err = ConfigError::OutOfRange {
            name: "n",
            value: "12".into(),
            min: Some("0".into()),
            max: None,
        };
        assert_eq!(err.to_string(), "Value 12 of 'n' is outside [0, ..]");
        let err = ConfigError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().ends_with("a -> b -> a"));
    }
}
