//! Shared building blocks for Oracle Classic image builds.
//!
//! - [`StateBag`] and [`StateKey`]: the per-run typed key/value store
//! - [`keys`]: conventional keys steps agree on
//! - [`BuilderConfig`]: user configuration and its validation
//! - [`assemble`]: turn a finished run's state into an [`Artifact`]

pub mod config;
pub mod domain;
pub mod error;
pub mod keys;
pub mod state;

pub use config::{BuilderConfig, CommConfig, Credentials, PersistentVolumeConfig};
pub use domain::*;
pub use error::{ArtifactError, ConfigError, FailureKind, StateError, StepFailure};
pub use state::{StateBag, StateKey};
