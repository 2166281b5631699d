//! Storage volumes for the persistent-volume build.

use async_trait::async_trait;
use classic_core::{keys, InstanceInfo, StateBag, StateKey, StorageVolume};
use tokio_util::sync::CancellationToken;

use super::{cancellable, fail, internal, log_cleanup_error, StepEnv};
use crate::core::{Step, StepAction, StepKind};
use crate::services::VolumeSpec;

pub struct StepCreateVolume {
    env: StepEnv,
    step_name: String,
    spec: VolumeSpec,
    /// Where the created volume is recorded
    key: StateKey<StorageVolume>,
}

impl StepCreateVolume {
    pub fn new(env: StepEnv, spec: VolumeSpec, key: StateKey<StorageVolume>) -> Self {
        Self {
            env,
            step_name: format!("create_{}", key.name()),
            spec,
            key,
        }
    }
}

#[async_trait]
impl Step for StepCreateVolume {
    fn name(&self) -> &str {
        &self.step_name
    }

    fn kind(&self) -> StepKind {
        StepKind::StoragePreparation
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.spec.name)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say(format!(
            "Creating {}GB storage volume {}...",
            self.spec.size_gb, self.spec.name
        ));

        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.create_storage_volume(&self.spec)).await {
            Ok(volume) => {
                ui.say(format!("Created storage volume: {}", volume.name));
                state.put(self.key, volume);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error creating storage volume", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(volume)) = state.take(self.key) else {
            return;
        };
        self.env
            .ui
            .say(format!("Cleaning up storage volume {}...", volume.name));
        if let Err(e) = self
            .env
            .services
            .compute
            .delete_storage_volume(&volume.name)
            .await
        {
            log_cleanup_error(&self.env.ui, self.name(), "storage volume", e);
        }
    }
}

/// Attaches an existing volume to the instance recorded under `instance`.
pub struct StepAttachVolume {
    env: StepEnv,
    volume: String,
    index: u32,
    instance: StateKey<InstanceInfo>,
}

impl StepAttachVolume {
    pub fn new(
        env: StepEnv,
        volume: impl Into<String>,
        index: u32,
        instance: StateKey<InstanceInfo>,
    ) -> Self {
        Self {
            env,
            volume: volume.into(),
            index,
            instance,
        }
    }
}

#[async_trait]
impl Step for StepAttachVolume {
    fn name(&self) -> &str {
        "attach_volume"
    }

    fn kind(&self) -> StepKind {
        StepKind::Attach
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say(format!(
            "Attaching volume {} at index {}...",
            self.volume, self.index
        ));

        let instance = match state.get(self.instance) {
            Ok(info) => info.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        let compute = &self.env.services.compute;
        match cancellable(
            cancel,
            compute.attach_volume(&instance, &self.volume, self.index),
        )
        .await
        {
            Ok(attachment) => {
                ui.say(format!("Attached volume: {}", attachment.name));
                state.put(keys::VOLUME_ATTACHMENT, attachment);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error attaching volume", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(attachment)) = state.take(keys::VOLUME_ATTACHMENT) else {
            return;
        };
        self.env.ui.say("Detaching volume...");
        if let Err(e) = self.env.services.compute.detach_volume(&attachment).await {
            log_cleanup_error(&self.env.ui, self.name(), "volume attachment", e);
        }
    }
}

/// Block device a volume attached at `index` shows up as. Index 1 is the
/// boot disk at `/dev/xvdb`.
pub(crate) fn device_for_index(index: u32) -> String {
    let offset = index.saturating_sub(1).min(24) as u8;
    format!("/dev/xvd{}", (b'b' + offset) as char)
}
