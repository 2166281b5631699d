use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol violations when reading the state bag.
///
/// These point at a defect in a step or in the runner, never at a failed
/// build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("state key `{key}` is missing")]
    MissingKey { key: &'static str },

    #[error("state key `{key}` holds {found}, expected {expected}")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration:\n  * {}", .0.join("\n  * "))]
    Invalid(Vec<String>),
}

/// Whether a failure marker reports a failed build or a defect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step's own operation failed
    #[default]
    Build,
    /// The state bag broke its protocol or the step panicked
    Internal,
}

/// Failure marker written by a step that could not complete.
///
/// The runner surfaces the marker as the run's error after cleanup.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("step {step} failed: {message}")]
pub struct StepFailure {
    pub step: String,
    pub message: String,
    #[serde(default)]
    pub kind: FailureKind,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            kind: FailureKind::Build,
        }
    }

    /// Marker for a defect rather than a failed build.
    pub fn internal(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Internal,
            ..Self::new(step, message)
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind == FailureKind::Internal
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// A step reported failure during the run.
    #[error(transparent)]
    Build(#[from] StepFailure),

    /// Result markers were written with the wrong type or only partially.
    #[error("internal state error while assembling artifact: {0}")]
    Internal(#[from] StateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StateError::MissingKey { key: "instance_ip" };
        assert!(error.to_string().contains("instance_ip"));

        let failure = StepFailure::new("create_instance", "quota exceeded");
        assert_eq!(
            failure.to_string(),
            "step create_instance failed: quota exceeded"
        );
        assert!(!failure.is_internal());
    }

    #[test]
    fn test_internal_failure_kind() {
        let failure = StepFailure::internal("attach_volume", "state key `x` is missing");
        assert!(failure.is_internal());
        assert_eq!(failure.kind, FailureKind::Internal);
        assert_eq!(failure.step, "attach_volume");
    }

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let error = ConfigError::Invalid(vec!["username is required".into(), "shape is required".into()]);
        let text = error.to_string();

        assert!(text.contains("username is required"));
        assert!(text.contains("shape is required"));
    }
}
