//! Step trait and related types for sequential workflow execution.
//!
//! A step is one atomic build action. The runner calls `execute` at most once
//! and, if execute was called, `cleanup` at most once, in reverse order of
//! execution.

use async_trait::async_trait;
use classic_core::StateBag;
use tokio_util::sync::CancellationToken;

/// What the runner should do after a step's execute returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Proceed to the next step
    Continue,
    /// Stop forward execution. A failure is signalled by also writing the
    /// failure marker; without it this is a successful early stop.
    Halt,
}

/// Coarse classification of a step, used for logging and for inspecting
/// assembled workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// SSH key material
    Credentials,
    /// IP reservations, API keys, security lists
    Network,
    /// Storage volume creation
    StoragePreparation,
    /// Instance creation
    Instance,
    /// Communicator connection
    Connect,
    /// Provisioner run
    Provision,
    /// Deliberate removal of an intermediate resource mid-build
    Teardown,
    /// Volume hand-off between instances
    Attach,
    /// Moving the disk image off the builder
    Upload,
    /// Snapshot, machine image and image list registration
    ImageCapture,
    /// Removal of temporary keys from the instance
    KeyCleanup,
    Other,
}

/// Core trait that every unit of a workflow implements.
///
/// Steps never panic or return errors across this boundary: on failure they
/// write [`classic_core::keys::ERROR`] into the state bag and return
/// [`StepAction::Halt`]. Cleanup is best effort, must be idempotent, and
/// logs its own errors instead of propagating them.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier used in logs and events.
    fn name(&self) -> &str;

    fn kind(&self) -> StepKind {
        StepKind::Other
    }

    /// Name of the cloud resource this step creates, if it was fixed when
    /// the step was constructed.
    fn resource_name(&self) -> Option<&str> {
        None
    }

    /// Perform the action.
    ///
    /// `cancel` is the run's cancellation token. Long-running calls should
    /// race it and return promptly once it fires.
    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction;

    /// Undo whatever `execute` managed to do.
    async fn cleanup(&self, _state: &mut StateBag) {}
}
