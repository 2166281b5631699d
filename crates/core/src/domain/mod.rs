mod artifact;
mod resources;
mod variant;

pub use artifact::{assemble, Artifact, BUILDER_ID};
pub use resources::{
    ImageList, ImageListEntry, InstanceInfo, IpReservation, KeyPair, MachineImage,
    SecurityList, Snapshot, StorageVolume, VolumeAttachment,
};
pub use variant::BuildVariant;
