//! Image capture: upload from the builder, machine image registration,
//! snapshots and the destination image list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use classic_core::{keys, StateBag};
use tokio_util::sync::CancellationToken;

use super::volume::device_for_index;
use super::{cancellable, fail, halt, internal, log_cleanup_error, StepEnv};
use crate::core::{Step, StepAction, StepKind};
use crate::error::ServiceError;
use crate::keys::COMMUNICATOR;

/// Runs the upload command on the builder to turn the attached master volume
/// into an image file.
pub struct StepUploadImage {
    env: StepEnv,
    command_template: String,
}

impl StepUploadImage {
    pub fn new(env: StepEnv, command_template: impl Into<String>) -> Self {
        Self {
            env,
            command_template: command_template.into(),
        }
    }

    fn render(&self, device: &str, image_file: &str) -> String {
        self.command_template
            .replace("{device}", device)
            .replace("{image_file}", image_file)
    }
}

#[async_trait]
impl Step for StepUploadImage {
    fn name(&self) -> &str {
        "upload_image"
    }

    fn kind(&self) -> StepKind {
        StepKind::Upload
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        let comm = match state.get(COMMUNICATOR) {
            Ok(comm) => Arc::clone(comm),
            Err(e) => return internal(state, ui, self.name(), e),
        };
        let index = match state.get(keys::VOLUME_ATTACHMENT) {
            Ok(attachment) => attachment.index,
            Err(e) => return internal(state, ui, self.name(), e),
        };

        let image_file = format!("{}.tar.gz", self.env.config.image_name);
        let command = self.render(&device_for_index(index), &image_file);

        ui.say("Uploading image to object storage...");
        match cancellable(cancel, comm.run(&command)).await {
            Ok(0) => {
                ui.say(format!("Uploaded image file {image_file}"));
                state.put(keys::UPLOADED_IMAGE_FILE, image_file);
                StepAction::Continue
            }
            Ok(code) => halt(
                state,
                ui,
                self.name(),
                format!("Upload command exited with status {code}"),
            ),
            Err(e) => fail(state, ui, self.name(), "Error uploading image", e),
        }
    }
}

/// Registers the uploaded file as a machine image.
pub struct StepCreateMachineImage {
    env: StepEnv,
}

impl StepCreateMachineImage {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Step for StepCreateMachineImage {
    fn name(&self) -> &str {
        "create_machine_image"
    }

    fn kind(&self) -> StepKind {
        StepKind::ImageCapture
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.env.config.image_name)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        let file = match state.get(keys::UPLOADED_IMAGE_FILE) {
            Ok(file) => file.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        let name = &self.env.config.image_name;
        ui.say(format!("Registering machine image {name}..."));
        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.create_machine_image(name, &file)).await {
            Ok(image) => {
                ui.say(format!("Registered machine image: {}", image.name));
                state.put(keys::MACHINE_IMAGE, image.name);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error creating machine image", e),
        }
    }
}

/// Snapshots the ephemeral instance into a machine image.
pub struct StepSnapshot {
    env: StepEnv,
}

impl StepSnapshot {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Step for StepSnapshot {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn kind(&self) -> StepKind {
        StepKind::ImageCapture
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.env.config.image_name)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        let instance = match state.get(keys::INSTANCE_INFO) {
            Ok(info) => info.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        ui.say("Creating Snapshot...");
        let secs = self.env.config.snapshot_timeout_secs;
        let compute = &self.env.services.compute;
        let snapshot = tokio::time::timeout(
            Duration::from_secs(secs),
            cancellable(
                cancel,
                compute.create_snapshot(&instance, &self.env.config.image_name),
            ),
        )
        .await
        .unwrap_or(Err(ServiceError::Timeout { secs }));

        match snapshot {
            Ok(snapshot) => {
                ui.say(format!("Created snapshot: {}", snapshot.name));
                state.put(keys::MACHINE_IMAGE, snapshot.machine_image.clone());
                state.put(keys::SNAPSHOT, snapshot);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error creating snapshot", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        // The machine image outlives its snapshot record.
        let Ok(Some(snapshot)) = state.take(keys::SNAPSHOT) else {
            return;
        };
        self.env.ui.say("Deleting Snapshot...");
        if let Err(e) = self.env.services.compute.delete_snapshot(&snapshot).await {
            log_cleanup_error(&self.env.ui, self.name(), "snapshot", e);
        }
    }
}

/// Adds the captured machine image to the destination image list as its new
/// default entry, creating the list on first use.
pub struct StepImageList {
    env: StepEnv,
}

impl StepImageList {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Step for StepImageList {
    fn name(&self) -> &str {
        "image_list"
    }

    fn kind(&self) -> StepKind {
        StepKind::ImageCapture
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.env.config.dest_image_list)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        let config = &self.env.config;
        let compute = &self.env.services.compute;
        let list_name = &config.dest_image_list;
        let description = &config.dest_image_list_description;

        let machine_image = match state.get(keys::MACHINE_IMAGE) {
            Ok(name) => name.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        ui.say(format!("Adding image to image list {list_name}..."));
        let list = match cancellable(cancel, compute.get_image_list(list_name)).await {
            Ok(list) => list,
            Err(e) if e.is_not_found() => {
                ui.say(format!("Creating image list {list_name}"));
                match cancellable(cancel, compute.create_image_list(list_name, description)).await
                {
                    Ok(list) => list,
                    Err(e) => {
                        return fail(state, ui, self.name(), "Error creating image list", e)
                    }
                }
            }
            Err(e) => return fail(state, ui, self.name(), "Error retrieving image list", e),
        };

        let version = list.next_version();
        let entry = match cancellable(
            cancel,
            compute.create_image_list_entry(
                list_name,
                version,
                vec![config.qualified(&machine_image)],
            ),
        )
        .await
        {
            Ok(entry) => entry,
            Err(e) => return fail(state, ui, self.name(), "Error adding image list entry", e),
        };

        if let Err(e) = cancellable(
            cancel,
            compute.set_image_list_default(list_name, version, description),
        )
        .await
        {
            return fail(state, ui, self.name(), "Error setting default image list version", e);
        }

        let image = match cancellable(cancel, compute.get_machine_image(&machine_image)).await {
            Ok(image) => image,
            Err(e) => return fail(state, ui, self.name(), "Error retrieving machine image", e),
        };

        ui.say(format!(
            "Image list {list_name} now defaults to version {version}"
        ));
        state.put(keys::IMAGE_LIST_ENTRY, entry);
        state.put(keys::IMAGE_LIST_VERSION, version);
        state.put(keys::MACHINE_IMAGE_NAME, image.name);
        state.put(keys::MACHINE_IMAGE_FILE, image.file);
        StepAction::Continue
    }
}
