//! Builder configuration loaded from TOML.
//!
//! Loading only deserializes; [`BuilderConfig::prepare`] fills in defaults and
//! collects every validation problem before a build is assembled.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::BuildVariant;
use crate::error::ConfigError;

const DEFAULT_BUILDER_SHAPE: &str = "oc3";
const DEFAULT_BUILDER_IMAGE_LIST: &str = "/oracle/public/OL_7.2_UEKR4_x86_64";
const DEFAULT_BUILDER_IMAGE_LIST_ENTRY: u32 = 5;
const DEFAULT_COMM_USERNAME: &str = "opc";
const DEFAULT_COMM_PORT: u16 = 22;
const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 20 * 60;
const DEFAULT_BUILD_NAME: &str = "oracle-classic";

/// Upload script run on the builder instance.
///
/// `{image_file}` is replaced with the name of the tarball to produce and
/// `{device}` with the block device the master volume is attached as.
pub const DEFAULT_UPLOAD_IMAGE_COMMAND: &str = r#"set -e
mkdir -p /builder
cd /builder
sudo dd if={device} bs=8M status=none | gzip -1 > diskimage.raw.gz
tar --format=oldgnu -Szcf {image_file} diskimage.raw.gz
rm diskimage.raw.gz
split -b 100m {image_file} segment_
"#;

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub identity_domain: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity_domain", &self.identity_domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the communicator reaches build instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    pub username: String,
    pub port: u16,
    /// Use an existing private key instead of generating a temporary pair.
    pub private_key_file: Option<String>,
    pub pty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentVolumeConfig {
    /// Size of the master volume in GB. Zero selects the ephemeral build.
    pub persistent_volume_size: u32,
    pub builder_shape: String,
    pub builder_image_list: String,
    pub builder_image_list_entry: u32,
    pub builder_upload_image_command: String,
    pub builder_comm: CommConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub api_endpoint: String,

    #[serde(default)]
    pub source_image_list: String,
    #[serde(default)]
    pub source_image_list_entry: Option<u32>,
    #[serde(default)]
    pub shape: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub dest_image_list: String,
    #[serde(default)]
    pub dest_image_list_description: String,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,

    #[serde(default = "default_build_name")]
    pub build_name: String,
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub comm: CommConfig,
    #[serde(flatten)]
    pub persistent_volume: PersistentVolumeConfig,
}

fn default_snapshot_timeout() -> u64 {
    DEFAULT_SNAPSHOT_TIMEOUT_SECS
}

fn default_build_name() -> String {
    DEFAULT_BUILD_NAME.to_string()
}

impl BuilderConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn is_persistent_volume(&self) -> bool {
        self.persistent_volume.persistent_volume_size > 0
    }

    pub fn variant(&self) -> BuildVariant {
        if self.is_persistent_volume() {
            BuildVariant::PersistentVolume
        } else {
            BuildVariant::Ephemeral
        }
    }

    /// Where the private key is written when running in debug mode.
    pub fn debug_key_path(&self) -> String {
        format!("oci_classic_{}.pem", self.build_name)
    }

    /// Expand a short resource name into the account-qualified form.
    pub fn qualified(&self, name: &str) -> String {
        format!(
            "/Compute-{}/{}/{}",
            self.credentials.identity_domain, self.credentials.username, name
        )
    }

    /// Apply defaults and validate, reporting every problem at once.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        let mut errs = Vec::new();

        let required = [
            ("identity_domain", &self.credentials.identity_domain),
            ("username", &self.credentials.username),
            ("password", &self.credentials.password),
            ("api_endpoint", &self.api_endpoint),
            ("source_image_list", &self.source_image_list),
            ("shape", &self.shape),
            ("image_name", &self.image_name),
            ("dest_image_list", &self.dest_image_list),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errs.push(format!("{field} must be specified"));
            }
        }

        if !self.api_endpoint.is_empty()
            && !(self.api_endpoint.starts_with("https://")
                || self.api_endpoint.starts_with("http://"))
        {
            errs.push(format!(
                "api_endpoint must be an http(s) URL, got {:?}",
                self.api_endpoint
            ));
        }

        if self.image_name.chars().any(char::is_whitespace) {
            errs.push("image_name must not contain whitespace".to_string());
        }

        if self.snapshot_timeout_secs == 0 {
            errs.push("snapshot_timeout_secs must be greater than zero".to_string());
        }

        if self.dest_image_list_description.is_empty() {
            self.dest_image_list_description = "Image list created by oracle-classic".to_string();
        }

        fill_comm_defaults(&mut self.comm);

        if self.is_persistent_volume() {
            self.prepare_persistent_volume(&mut errs);
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errs))
        }
    }

    fn prepare_persistent_volume(&mut self, errs: &mut Vec<String>) {
        let pv = &mut self.persistent_volume;

        if pv.builder_shape.is_empty() {
            pv.builder_shape = DEFAULT_BUILDER_SHAPE.to_string();
        }
        if pv.builder_image_list.is_empty() {
            pv.builder_image_list = DEFAULT_BUILDER_IMAGE_LIST.to_string();
            if pv.builder_image_list_entry == 0 {
                pv.builder_image_list_entry = DEFAULT_BUILDER_IMAGE_LIST_ENTRY;
            }
        }
        if pv.builder_upload_image_command.is_empty() {
            pv.builder_upload_image_command = DEFAULT_UPLOAD_IMAGE_COMMAND.to_string();
        }

        if pv.builder_comm.username.is_empty() {
            pv.builder_comm.username = self.comm.username.clone();
        }
        if pv.builder_comm.private_key_file.is_none() {
            pv.builder_comm.private_key_file = self.comm.private_key_file.clone();
        }
        fill_comm_defaults(&mut pv.builder_comm);
        // Uploading through sudo needs a terminal on the builder.
        pv.builder_comm.pty = true;

        if self.source_image_list_entry.is_none() {
            errs.push(
                "source_image_list_entry is required for persistent volume builds".to_string(),
            );
        }
    }
}

fn fill_comm_defaults(comm: &mut CommConfig) {
    if comm.username.is_empty() {
        comm.username = DEFAULT_COMM_USERNAME.to_string();
    }
    if comm.port == 0 {
        comm.port = DEFAULT_COMM_PORT;
    }
}
