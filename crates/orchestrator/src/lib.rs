//! Build orchestration for Oracle Classic machine images.
//!
//! A build is a [`Workflow`] of [`Step`]s run by a [`StepRunner`] against one
//! [`classic_core::StateBag`]. [`Builder`] wires everything together.

pub mod builder;
pub mod core;
pub mod error;
pub mod keys;
pub mod services;
pub mod steps;
pub mod workflow;

pub use builder::{logging_enabled, resolve_run_id, Builder, LOGGING_ENV, RUN_ID_ENV};
pub use classic_core::{Artifact, BuildVariant, BUILDER_ID};
pub use crate::core::{BuildUi, RunSummary, Step, StepAction, StepKind, StepRunner};
pub use error::{OrchestratorError, Result, ServiceError};
pub use services::{
    ComputeClient, Communicator, Connector, InMemoryCompute, InMemoryConnector, ProvisionHook,
    RecordingHook, Services,
};
pub use workflow::{build, ResourceNames, Workflow, WorkflowParams};
