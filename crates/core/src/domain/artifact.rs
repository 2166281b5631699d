use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ArtifactError;
use crate::keys;
use crate::state::StateBag;

/// Identifier reported alongside every artifact this builder produces.
pub const BUILDER_ID: &str = "oracle.classic";

/// Machine image registered in an image list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub image_list_version: u32,
    pub machine_image_name: String,
    pub machine_image_file: String,
}

impl Artifact {
    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.machine_image_name, self.image_list_version)
    }

    /// Local files making up the artifact. Images live in the cloud only.
    pub fn files(&self) -> Vec<String> {
        Vec::new()
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "An image list entry was created: \nName: {}\nFile: {}\nVersion: {}",
            self.machine_image_name, self.machine_image_file, self.image_list_version
        )
    }
}

/// Extract the build result from a finished run.
///
/// The failure marker wins over everything else. Without result markers the
/// run simply produced no image, which is not an error. Markers that are
/// present but mistyped, or only partially written, are an internal error.
pub fn assemble(state: &StateBag) -> Result<Option<Artifact>, ArtifactError> {
    if let Some(failure) = state.get_ok(keys::ERROR)? {
        return Err(ArtifactError::Build(failure.clone()));
    }

    let version = state.get_ok(keys::IMAGE_LIST_VERSION)?;
    let name = state.get_ok(keys::MACHINE_IMAGE_NAME)?;
    let file = state.get_ok(keys::MACHINE_IMAGE_FILE)?;

    if version.is_none() && name.is_none() && file.is_none() {
        debug!("No result markers in state, build produced no artifact");
        return Ok(None);
    }

    Ok(Some(Artifact {
        image_list_version: *state.get(keys::IMAGE_LIST_VERSION)?,
        machine_image_name: state.get(keys::MACHINE_IMAGE_NAME)?.clone(),
        machine_image_file: state.get(keys::MACHINE_IMAGE_FILE)?.clone(),
    }))
}
