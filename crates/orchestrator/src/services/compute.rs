//! Compute API surface the build steps depend on.
//!
//! The real HTTP client lives outside this crate; anything implementing
//! [`ComputeClient`] can drive a build. Implementations are shared read-only
//! across concurrent builds.

use async_trait::async_trait;
use classic_core::{
    ImageList, ImageListEntry, InstanceInfo, IpReservation, MachineImage, SecurityList,
    Snapshot, StorageVolume, VolumeAttachment,
};

use crate::error::ServiceError;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Parameters for a new storage volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u32,
    pub bootable: bool,
    /// Image list to seed a bootable volume from
    pub image_list: Option<String>,
    pub image_list_entry: Option<u32>,
}

/// Parameters for a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub shape: String,
    /// Boot from an image list. Ignored when `boot_volume` is set.
    pub image_list: Option<String>,
    pub image_list_entry: Option<u32>,
    /// Boot from an existing storage volume
    pub boot_volume: Option<String>,
    /// Extra volumes attached at creation, at indexes 1..
    pub data_volumes: Vec<String>,
    pub ssh_keys: Vec<String>,
    pub ip_reservation: Option<String>,
    pub security_lists: Vec<String>,
}

#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn create_ip_reservation(&self, name: &str) -> ServiceResult<IpReservation>;
    async fn delete_ip_reservation(&self, name: &str) -> ServiceResult<()>;

    async fn add_ssh_key(&self, name: &str, public_key: &str) -> ServiceResult<()>;
    async fn delete_ssh_key(&self, name: &str) -> ServiceResult<()>;

    /// Create a security list with a rule admitting `port` from anywhere.
    async fn create_security_list(&self, name: &str, port: u16) -> ServiceResult<SecurityList>;
    async fn delete_security_list(&self, list: &SecurityList) -> ServiceResult<()>;

    async fn create_storage_volume(&self, spec: &VolumeSpec) -> ServiceResult<StorageVolume>;
    async fn delete_storage_volume(&self, name: &str) -> ServiceResult<()>;

    /// Create an instance and wait until it is running.
    async fn create_instance(&self, spec: &InstanceSpec) -> ServiceResult<InstanceInfo>;
    /// Delete an instance and wait until it is gone.
    async fn delete_instance(&self, instance: &InstanceInfo) -> ServiceResult<()>;

    async fn attach_volume(
        &self,
        instance: &InstanceInfo,
        volume: &str,
        index: u32,
    ) -> ServiceResult<VolumeAttachment>;
    async fn detach_volume(&self, attachment: &VolumeAttachment) -> ServiceResult<()>;

    /// Snapshot an instance into a machine image and wait for completion.
    async fn create_snapshot(
        &self,
        instance: &InstanceInfo,
        machine_image: &str,
    ) -> ServiceResult<Snapshot>;
    /// Delete the snapshot record. The machine image it produced stays.
    async fn delete_snapshot(&self, snapshot: &Snapshot) -> ServiceResult<()>;

    /// Register an uploaded image file as a machine image.
    async fn create_machine_image(&self, name: &str, file: &str) -> ServiceResult<MachineImage>;
    async fn get_machine_image(&self, name: &str) -> ServiceResult<MachineImage>;

    async fn get_image_list(&self, name: &str) -> ServiceResult<ImageList>;
    async fn create_image_list(&self, name: &str, description: &str) -> ServiceResult<ImageList>;
    async fn create_image_list_entry(
        &self,
        list: &str,
        version: u32,
        machine_images: Vec<String>,
    ) -> ServiceResult<ImageListEntry>;
    async fn set_image_list_default(
        &self,
        list: &str,
        version: u32,
        description: &str,
    ) -> ServiceResult<()>;
}
