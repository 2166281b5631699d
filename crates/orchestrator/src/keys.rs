//! State bag keys for handles owned by this crate.
//!
//! Data keys shared with artifact assembly live in [`classic_core::keys`].

use std::sync::Arc;

use classic_core::{StateKey, StorageVolume};

use crate::core::BuildUi;
use crate::services::Communicator;

pub const UI: StateKey<BuildUi> = StateKey::new("ui");

/// Open connection to the current build target.
pub const COMMUNICATOR: StateKey<Arc<dyn Communicator>> = StateKey::new("communicator");

pub const MASTER_VOLUME: StateKey<StorageVolume> = StateKey::new("master_volume");
pub const BUILDER_VOLUME: StateKey<StorageVolume> = StateKey::new("builder_volume");
