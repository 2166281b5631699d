use classic_core::{ArtifactError, ConfigError, StateError, StepFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A step wrote the failure marker. Cleanup has already run.
    #[error("Build failed: {0}")]
    StepFailed(StepFailure),

    /// A step hit a defect: a broken state bag protocol or a panic.
    /// Cleanup has already run.
    #[error("Internal error: {0}")]
    Internal(StepFailure),

    /// The workflow could not be assembled; nothing was executed.
    #[error("Invalid build parameters: {0}")]
    InvalidParameters(String),

    #[error("Workflow already started; a build runs at most once")]
    AlreadyStarted,

    /// The state bag broke its protocol (missing or mistyped key).
    #[error("Internal state error: {0}")]
    State(#[from] StateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Create an invalid parameters error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameters(reason.into())
    }

    /// Whether the error is a build failure rather than a defect or misuse.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Self::StepFailed(_))
    }
}

impl From<StepFailure> for OrchestratorError {
    fn from(failure: StepFailure) -> Self {
        if failure.is_internal() {
            Self::Internal(failure)
        } else {
            Self::StepFailed(failure)
        }
    }
}

impl From<ArtifactError> for OrchestratorError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Build(failure) => failure.into(),
            ArtifactError::Internal(state) => Self::State(state),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors returned by the collaborators steps call into: the compute API,
/// the communicator, and the provisioning hook.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("API call {operation} failed: {message}")]
    Api { operation: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Create an API error.
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
