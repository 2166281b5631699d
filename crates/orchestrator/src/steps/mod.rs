//! Concrete build steps.
//!
//! Each step takes its parameters and collaborator handles at construction
//! and talks to the cloud only through [`Services`]. Failures go through
//! [`halt`] so the failure marker and the operator message stay in sync.

mod connect;
mod image;
mod instance;
mod key_pair;
mod network;
mod volume;

use std::future::Future;
use std::sync::Arc;

use classic_core::{keys, BuilderConfig, StateBag, StateError, StepFailure};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{BuildUi, StepAction};
use crate::error::ServiceError;
use crate::services::{ServiceResult, Services};

pub use connect::{ConnectTarget, StepCleanupTempKeys, StepConnect, StepProvision};
pub use image::{StepCreateMachineImage, StepImageList, StepSnapshot, StepUploadImage};
pub use instance::{InstanceRole, StepCreateInstance, StepTerminateMaster};
pub use key_pair::StepKeyPair;
pub use network::{StepAddKeyToApi, StepCreateIpReservation, StepSecurity};
pub use volume::{StepAttachVolume, StepCreateVolume};

/// Handles every step is constructed with.
#[derive(Clone, Debug)]
pub struct StepEnv {
    pub config: Arc<BuilderConfig>,
    pub services: Services,
    pub ui: BuildUi,
}

/// Record a failure, tell the operator, and stop the workflow.
pub(crate) fn halt(
    state: &mut StateBag,
    ui: &BuildUi,
    step: &str,
    message: impl Into<String>,
) -> StepAction {
    let failure = StepFailure::new(step, message);
    ui.error(failure.message.clone());
    state.put(keys::ERROR, failure);
    StepAction::Halt
}

/// Halt on a collaborator error. Cancellation stops the workflow without
/// marking the build failed.
pub(crate) fn fail(
    state: &mut StateBag,
    ui: &BuildUi,
    step: &str,
    context: &str,
    err: ServiceError,
) -> StepAction {
    match err {
        ServiceError::Cancelled => {
            debug!(step, "Step observed cancellation");
            StepAction::Halt
        }
        err => halt(state, ui, step, format!("{context}: {err}")),
    }
}

/// Halt when the state bag broke its protocol. The marker is flagged
/// internal so the run reports a defect instead of a failed build.
pub(crate) fn internal(state: &mut StateBag, ui: &BuildUi, step: &str, err: StateError) -> StepAction {
    let failure = StepFailure::internal(step, format!("internal state error: {err}"));
    ui.error(failure.message.clone());
    state.put(keys::ERROR, failure);
    StepAction::Halt
}

/// Race a collaborator call against the run's cancellation token.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ServiceError::Cancelled),
        result = call => result,
    }
}

/// Report a failed cleanup call. Missing resources are already clean.
pub(crate) fn log_cleanup_error(ui: &BuildUi, step: &str, what: &str, err: ServiceError) {
    if err.is_not_found() {
        debug!(step, what, "Nothing to clean up: {}", err);
    } else {
        warn!(step, what, error = %err, "Cleanup failed");
        ui.error(format!(
            "Error cleaning up {what}: {err}. Please delete it manually."
        ));
    }
}
