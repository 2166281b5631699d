//! Conventional state bag keys.
//!
//! Every key has exactly one type for the lifetime of a run.

use std::sync::Arc;

use crate::config::BuilderConfig;
use crate::domain::{
    ImageListEntry, InstanceInfo, IpReservation, KeyPair, SecurityList, Snapshot,
    VolumeAttachment,
};
use crate::error::StepFailure;
use crate::state::StateKey;

pub const CONFIG: StateKey<Arc<BuilderConfig>> = StateKey::new("config");
pub const RUN_ID: StateKey<String> = StateKey::new("run_id");

/// Failure marker. Present only if some step failed.
pub const ERROR: StateKey<StepFailure> = StateKey::new("error");

pub const KEY_PAIR: StateKey<KeyPair> = StateKey::new("key_pair");
pub const DEBUG_KEY_PATH: StateKey<std::path::PathBuf> = StateKey::new("debug_key_path");
pub const API_KEY_NAME: StateKey<String> = StateKey::new("key_name");
pub const IP_RESERVATION: StateKey<IpReservation> = StateKey::new("ip_reservation");
pub const INSTANCE_IP: StateKey<String> = StateKey::new("instance_ip");
pub const SECURITY_LIST: StateKey<SecurityList> = StateKey::new("security_list");

pub const INSTANCE_INFO: StateKey<InstanceInfo> = StateKey::new("instance_info");
pub const MASTER_INSTANCE_INFO: StateKey<InstanceInfo> = StateKey::new("master_instance_info");
pub const BUILDER_INSTANCE_INFO: StateKey<InstanceInfo> =
    StateKey::new("builder_instance_info");
pub const VOLUME_ATTACHMENT: StateKey<VolumeAttachment> = StateKey::new("volume_attachment");

pub const SNAPSHOT: StateKey<Snapshot> = StateKey::new("snapshot");
pub const UPLOADED_IMAGE_FILE: StateKey<String> = StateKey::new("uploaded_image_file");
pub const IMAGE_LIST_ENTRY: StateKey<ImageListEntry> = StateKey::new("image_list_entry");

/// Name of the machine image captured by the build.
pub const MACHINE_IMAGE: StateKey<String> = StateKey::new("machine_image");

// Result markers read by artifact assembly.
pub const IMAGE_LIST_VERSION: StateKey<u32> = StateKey::new("image_list_version");
pub const MACHINE_IMAGE_NAME: StateKey<String> = StateKey::new("machine_image_name");
pub const MACHINE_IMAGE_FILE: StateKey<String> = StateKey::new("machine_image_file");
