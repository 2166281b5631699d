//! Instance lifecycle steps.

use async_trait::async_trait;
use classic_core::{keys, InstanceInfo, StateBag, StateError, StateKey};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{cancellable, fail, internal, log_cleanup_error, StepEnv};
use crate::core::{Step, StepAction, StepKind};
use crate::keys::COMMUNICATOR;
use crate::services::InstanceSpec;

/// Which instance of the build a [`StepCreateInstance`] launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRole {
    /// The only instance of an ephemeral build, booted from the source image
    Ephemeral { name: String },
    /// Boots from the master volume and gets provisioned
    Master { name: String, boot_volume: String },
    /// Boots the builder image with the scratch volume attached
    Builder { name: String, scratch_volume: String },
}

impl InstanceRole {
    fn instance_name(&self) -> &str {
        match self {
            Self::Ephemeral { name } | Self::Master { name, .. } | Self::Builder { name, .. } => {
                name
            }
        }
    }

    fn key(&self) -> StateKey<InstanceInfo> {
        match self {
            Self::Ephemeral { .. } => keys::INSTANCE_INFO,
            Self::Master { .. } => keys::MASTER_INSTANCE_INFO,
            Self::Builder { .. } => keys::BUILDER_INSTANCE_INFO,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Ephemeral { .. } => "instance",
            Self::Master { .. } => "master instance",
            Self::Builder { .. } => "builder instance",
        }
    }
}

pub struct StepCreateInstance {
    env: StepEnv,
    role: InstanceRole,
}

impl StepCreateInstance {
    pub fn new(env: StepEnv, role: InstanceRole) -> Self {
        Self { env, role }
    }

    fn spec(&self, state: &StateBag) -> Result<InstanceSpec, StateError> {
        let config = &self.env.config;
        let mut spec = InstanceSpec {
            name: self.role.instance_name().to_string(),
            ssh_keys: vec![state.get(keys::API_KEY_NAME)?.clone()],
            ip_reservation: Some(state.get(keys::IP_RESERVATION)?.name.clone()),
            security_lists: vec![state.get(keys::SECURITY_LIST)?.name.clone()],
            ..Default::default()
        };

        match &self.role {
            InstanceRole::Ephemeral { .. } => {
                spec.shape = config.shape.clone();
                spec.image_list = Some(config.source_image_list.clone());
                spec.image_list_entry = config.source_image_list_entry;
            }
            InstanceRole::Master { boot_volume, .. } => {
                spec.shape = config.shape.clone();
                spec.boot_volume = Some(boot_volume.clone());
            }
            InstanceRole::Builder { scratch_volume, .. } => {
                let pv = &config.persistent_volume;
                spec.shape = pv.builder_shape.clone();
                spec.image_list = Some(pv.builder_image_list.clone());
                spec.image_list_entry = Some(pv.builder_image_list_entry);
                spec.data_volumes = vec![scratch_volume.clone()];
            }
        }
        Ok(spec)
    }
}

#[async_trait]
impl Step for StepCreateInstance {
    fn name(&self) -> &str {
        match self.role {
            InstanceRole::Ephemeral { .. } => "create_instance",
            InstanceRole::Master { .. } => "create_master_instance",
            InstanceRole::Builder { .. } => "create_builder_instance",
        }
    }

    fn kind(&self) -> StepKind {
        StepKind::Instance
    }

    fn resource_name(&self) -> Option<&str> {
        Some(self.role.instance_name())
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say(format!("Creating {}...", self.role.label()));

        let spec = match self.spec(state) {
            Ok(spec) => spec,
            Err(e) => return internal(state, ui, self.name(), e),
        };

        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.create_instance(&spec)).await {
            Ok(info) => {
                ui.say(format!(
                    "Created {}: {}",
                    self.role.label(),
                    info.qualified_name()
                ));
                state.put(keys::INSTANCE_IP, info.ip.clone());
                state.put(self.role.key(), info);
                StepAction::Continue
            }
            Err(e) => fail(
                state,
                ui,
                self.name(),
                &format!("Error launching {}", self.role.label()),
                e,
            ),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        // Gone already if a teardown step removed it.
        let Ok(Some(info)) = state.take(self.role.key()) else {
            return;
        };
        self.env
            .ui
            .say(format!("Terminating {} {}...", self.role.label(), info.name));
        match self.env.services.compute.delete_instance(&info).await {
            Ok(()) => self
                .env
                .ui
                .say(format!("Terminated {} {}", self.role.label(), info.name)),
            Err(e) => log_cleanup_error(&self.env.ui, self.name(), self.role.label(), e),
        }
    }
}

/// Deletes the master instance once provisioning is done, freeing its boot
/// volume for the builder.
pub struct StepTerminateMaster {
    env: StepEnv,
}

impl StepTerminateMaster {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Step for StepTerminateMaster {
    fn name(&self) -> &str {
        "terminate_master_instance"
    }

    fn kind(&self) -> StepKind {
        StepKind::Teardown
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say("Deleting master instance...");

        // The connection to the master dies with it.
        if let Ok(Some(comm)) = state.take(COMMUNICATOR) {
            if let Err(e) = comm.disconnect().await {
                debug!(error = %e, "Disconnecting from master failed");
            }
        }

        let info = match state.get(keys::MASTER_INSTANCE_INFO) {
            Ok(info) => info.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.delete_instance(&info)).await {
            Ok(()) => {
                ui.say(format!("Terminated master instance {}", info.name));
                // Nothing left for the create step to clean up.
                let _ = state.take(keys::MASTER_INSTANCE_INFO);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error terminating master instance", e),
        }
    }
}
