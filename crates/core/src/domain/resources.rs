//! Records of cloud-side resources created during a build.
//!
//! Steps store these in the state bag so later steps can use them and their
//! own cleanup knows what to tear down.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpReservation {
    pub name: String,
    pub ip: String,
}

/// SSH key material used by the communicator.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityList {
    pub name: String,
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    pub name: String,
    pub size_gb: u32,
    pub bootable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub id: String,
    pub ip: String,
}

impl InstanceInfo {
    /// Fully qualified name the API uses for instance operations.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub name: String,
    pub instance: String,
    pub volume: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub machine_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageListEntry {
    pub version: u32,
    pub machine_images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageList {
    pub name: String,
    pub description: String,
    pub default_version: u32,
    pub entries: Vec<ImageListEntry>,
}

impl ImageList {
    /// Version the next entry should take.
    pub fn next_version(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version() {
        let mut list = ImageList {
            name: "/Compute-a/u/list".into(),
            description: String::new(),
            default_version: 0,
            entries: vec![],
        };
        assert_eq!(list.next_version(), 1);

        list.entries.push(ImageListEntry {
            version: 4,
            machine_images: vec![],
        });
        assert_eq!(list.next_version(), 5);
    }

    #[test]
    fn test_key_pair_debug_redacts_private_key() {
        let pair = KeyPair {
            private_key: "-----BEGIN SECRET-----".into(),
            public_key: "ssh-rsa AAAA".into(),
        };
        let rendered = format!("{pair:?}");

        assert!(!rendered.contains("SECRET"));
        assert!(rendered.contains("ssh-rsa AAAA"));
    }
}
