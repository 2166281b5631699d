//! Workflow assembly.
//!
//! [`build`] maps a [`BuildVariant`] and the run parameters onto an ordered,
//! immutable list of steps. It performs no I/O: every cloud resource name is
//! derived from the run id up front, so two builds with the same id plan the
//! same resources.

use std::sync::Arc;

use classic_core::{BuildVariant, BuilderConfig};
use tracing::debug;

use crate::core::{BuildUi, Step, StepKind};
use crate::error::{OrchestratorError, Result};
use crate::keys::{BUILDER_VOLUME, MASTER_VOLUME};
use crate::services::{Services, VolumeSpec};
use crate::steps::{
    ConnectTarget, InstanceRole, StepAddKeyToApi, StepAttachVolume, StepCleanupTempKeys,
    StepConnect, StepCreateInstance, StepCreateIpReservation, StepCreateMachineImage,
    StepCreateVolume, StepEnv, StepImageList, StepKeyPair, StepProvision, StepSecurity,
    StepSnapshot, StepTerminateMaster, StepUploadImage,
};

/// Attachment index of the master volume on the builder. Index 1 is the
/// builder's scratch volume.
pub const MASTER_VOLUME_INDEX: u32 = 2;

/// An ordered, immutable sequence of steps.
pub struct Workflow {
    steps: Vec<Box<dyn Step>>,
}

impl Workflow {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.kind()).collect()
    }

    /// Resource names fixed at assembly time, in step order.
    pub fn resource_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.resource_name().map(str::to_string))
            .collect()
    }

    pub fn into_steps(self) -> Vec<Box<dyn Step>> {
        self.steps
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.steps.iter().map(|s| s.name())).finish()
    }
}

/// Cloud resource names for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub master_volume: String,
    pub builder_volume: String,
    pub master_instance: String,
    pub builder_instance: String,
    pub instance: String,
    pub ip_reservation: String,
    pub security_list: String,
    pub ssh_key: String,
    /// Comment attached to the temporary public key
    pub key_comment: String,
}

impl ResourceNames {
    pub fn derive(run_id: &str) -> Self {
        Self {
            master_volume: format!("master-storage_{run_id}"),
            builder_volume: format!("builder-storage_{run_id}"),
            master_instance: format!("master-instance_{run_id}"),
            builder_instance: format!("builder-instance_{run_id}"),
            instance: format!("instance_{run_id}"),
            ip_reservation: format!("ipres_{run_id}"),
            security_list: format!("security-list_{run_id}"),
            ssh_key: format!("ssh-key_{run_id}"),
            key_comment: format!("oci-classic_{run_id}"),
        }
    }
}

/// Everything [`build`] needs. All handles are shared read-only with the
/// steps it constructs.
#[derive(Debug, Clone)]
pub struct WorkflowParams {
    pub run_id: String,
    pub config: Arc<BuilderConfig>,
    pub services: Services,
    pub ui: BuildUi,
}

impl WorkflowParams {
    fn validate(&self, variant: BuildVariant) -> Result<()> {
        if self.run_id.trim().is_empty() {
            return Err(OrchestratorError::invalid("run id must not be empty"));
        }
        if self.run_id.contains('/') || self.run_id.chars().any(char::is_whitespace) {
            return Err(OrchestratorError::invalid(format!(
                "run id {:?} cannot be used in resource names",
                self.run_id
            )));
        }
        if variant == BuildVariant::PersistentVolume {
            if self.config.persistent_volume.persistent_volume_size == 0 {
                return Err(OrchestratorError::invalid(
                    "persistent volume builds need a non-zero persistent_volume_size",
                ));
            }
            if self.config.source_image_list_entry.is_none() {
                return Err(OrchestratorError::invalid(
                    "persistent volume builds need source_image_list_entry",
                ));
            }
        }
        Ok(())
    }
}

/// Assemble the workflow for `variant`.
///
/// Invalid parameters are reported here, before anything has run.
pub fn build(variant: BuildVariant, params: &WorkflowParams) -> Result<Workflow> {
    params.validate(variant)?;

    let names = ResourceNames::derive(&params.run_id);
    let env = StepEnv {
        config: Arc::clone(&params.config),
        services: params.services.clone(),
        ui: params.ui.clone(),
    };

    let steps = match variant {
        BuildVariant::PersistentVolume => persistent_volume_steps(&env, &names),
        BuildVariant::Ephemeral => ephemeral_steps(&env, &names),
    };

    debug!(
        run_id = %params.run_id,
        variant = %variant,
        steps = steps.len(),
        "Assembled workflow"
    );
    Ok(Workflow::new(steps))
}

fn key_pair(env: &StepEnv, names: &ResourceNames) -> Box<dyn Step> {
    Box::new(StepKeyPair::new(
        env.clone(),
        names.key_comment.clone(),
        env.config.debug_key_path(),
    ))
}

fn network(env: &StepEnv, names: &ResourceNames) -> [Box<dyn Step>; 3] {
    [
        Box::new(StepCreateIpReservation::new(
            env.clone(),
            names.ip_reservation.clone(),
        )),
        Box::new(StepAddKeyToApi::new(env.clone(), names.ssh_key.clone())),
        Box::new(StepSecurity::new(env.clone(), names.security_list.clone())),
    ]
}

fn persistent_volume_steps(env: &StepEnv, names: &ResourceNames) -> Vec<Box<dyn Step>> {
    let config = &env.config;
    let pv = &config.persistent_volume;

    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(StepCreateVolume::new(
            env.clone(),
            VolumeSpec {
                name: names.master_volume.clone(),
                size_gb: pv.persistent_volume_size,
                bootable: true,
                image_list: Some(config.source_image_list.clone()),
                image_list_entry: config.source_image_list_entry,
            },
            MASTER_VOLUME,
        )),
        // Twice the master size: the builder needs room for the raw disk
        // image and the tarball made from it.
        Box::new(StepCreateVolume::new(
            env.clone(),
            VolumeSpec {
                name: names.builder_volume.clone(),
                size_gb: pv.persistent_volume_size.saturating_mul(2),
                bootable: false,
                image_list: None,
                image_list_entry: None,
            },
            BUILDER_VOLUME,
        )),
        key_pair(env, names),
    ];
    steps.extend(network(env, names));
    steps.extend([
        Box::new(StepCreateInstance::new(
            env.clone(),
            InstanceRole::Master {
                name: names.master_instance.clone(),
                boot_volume: names.master_volume.clone(),
            },
        )) as Box<dyn Step>,
        Box::new(StepConnect::new(
            env.clone(),
            ConnectTarget::Instance,
            config.comm.clone(),
        )),
        Box::new(StepProvision::new(env.clone())),
        Box::new(StepTerminateMaster::new(env.clone())),
        Box::new(StepCreateInstance::new(
            env.clone(),
            InstanceRole::Builder {
                name: names.builder_instance.clone(),
                scratch_volume: names.builder_volume.clone(),
            },
        )),
        Box::new(StepAttachVolume::new(
            env.clone(),
            names.master_volume.clone(),
            MASTER_VOLUME_INDEX,
            classic_core::keys::BUILDER_INSTANCE_INFO,
        )),
        Box::new(StepConnect::new(
            env.clone(),
            ConnectTarget::Builder,
            pv.builder_comm.clone(),
        )),
        Box::new(StepUploadImage::new(
            env.clone(),
            pv.builder_upload_image_command.clone(),
        )),
        Box::new(StepCreateMachineImage::new(env.clone())),
        Box::new(StepImageList::new(env.clone())),
        Box::new(StepCleanupTempKeys::new(
            env.clone(),
            names.key_comment.clone(),
        )),
    ]);
    steps
}

fn ephemeral_steps(env: &StepEnv, names: &ResourceNames) -> Vec<Box<dyn Step>> {
    let mut steps = vec![key_pair(env, names)];
    steps.extend(network(env, names));
    steps.extend([
        Box::new(StepCreateInstance::new(
            env.clone(),
            InstanceRole::Ephemeral {
                name: names.instance.clone(),
            },
        )) as Box<dyn Step>,
        Box::new(StepConnect::new(
            env.clone(),
            ConnectTarget::Instance,
            env.config.comm.clone(),
        )),
        Box::new(StepProvision::new(env.clone())),
        Box::new(StepCleanupTempKeys::new(
            env.clone(),
            names.key_comment.clone(),
        )),
        Box::new(StepSnapshot::new(env.clone())),
        Box::new(StepImageList::new(env.clone())),
    ]);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryCompute, InMemoryConnector, RecordingHook};

    fn pv_config() -> BuilderConfig {
        let mut config = crate::steps::testing::config();
        config.persistent_volume.persistent_volume_size = 15;
        config.prepare().unwrap();
        config
    }

    fn params(run_id: &str, config: BuilderConfig) -> WorkflowParams {
        WorkflowParams {
            run_id: run_id.to_string(),
            config: Arc::new(config),
            services: Services::new(
                Arc::new(InMemoryCompute::new()),
                Arc::new(InMemoryConnector::new()),
                Arc::new(RecordingHook::new()),
            ),
            ui: BuildUi::detached(run_id),
        }
    }

    fn count(kinds: &[StepKind], kind: StepKind) -> usize {
        kinds.iter().filter(|k| **k == kind).count()
    }

    #[test]
    fn test_persistent_volume_layout() {
        let workflow = build(BuildVariant::PersistentVolume, &params("abc", pv_config())).unwrap();
        let kinds = workflow.kinds();

        assert_eq!(count(&kinds, StepKind::StoragePreparation), 2);
        let teardown = kinds
            .iter()
            .position(|k| *k == StepKind::Teardown)
            .unwrap();
        let first_capture = kinds
            .iter()
            .position(|k| *k == StepKind::ImageCapture)
            .unwrap();
        assert!(teardown < first_capture);

        assert_eq!(
            workflow.step_names(),
            vec![
                "create_master_volume",
                "create_builder_volume",
                "key_pair",
                "create_ip_reservation",
                "add_ssh_key",
                "security",
                "create_master_instance",
                "connect",
                "provision",
                "terminate_master_instance",
                "create_builder_instance",
                "attach_volume",
                "connect_builder",
                "upload_image",
                "create_machine_image",
                "image_list",
                "cleanup_temp_keys",
            ]
        );
    }

    #[test]
    fn test_ephemeral_is_shorter_without_storage() {
        let pv = build(BuildVariant::PersistentVolume, &params("abc", pv_config())).unwrap();
        let ephemeral =
            build(BuildVariant::Ephemeral, &params("abc", crate::steps::testing::config())).unwrap();

        assert!(ephemeral.len() < pv.len());
        assert_eq!(count(&ephemeral.kinds(), StepKind::StoragePreparation), 0);
        assert_eq!(count(&ephemeral.kinds(), StepKind::Teardown), 0);
        assert_eq!(
            ephemeral.step_names(),
            vec![
                "key_pair",
                "create_ip_reservation",
                "add_ssh_key",
                "security",
                "create_instance",
                "connect",
                "provision",
                "cleanup_temp_keys",
                "snapshot",
                "image_list",
            ]
        );
    }

    #[test]
    fn test_names_are_deterministic_per_run_id() {
        let first = build(BuildVariant::PersistentVolume, &params("abc", pv_config())).unwrap();
        let second = build(BuildVariant::PersistentVolume, &params("abc", pv_config())).unwrap();
        let other = build(BuildVariant::PersistentVolume, &params("xyz", pv_config())).unwrap();

        assert_eq!(first.resource_names(), second.resource_names());
        assert_ne!(first.resource_names(), other.resource_names());
        assert!(first
            .resource_names()
            .contains(&"master-storage_abc".to_string()));
        assert_eq!(ResourceNames::derive("abc"), ResourceNames::derive("abc"));
        assert_ne!(
            ResourceNames::derive("abc").ip_reservation,
            ResourceNames::derive("xyz").ip_reservation
        );
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let err = build(BuildVariant::Ephemeral, &params("", crate::steps::testing::config()))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidParameters(_)));

        let err = build(BuildVariant::Ephemeral, &params("a/b", crate::steps::testing::config()))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidParameters(_)));

        // An ephemeral config has no persistent volume size.
        let err = build(
            BuildVariant::PersistentVolume,
            &params("abc", crate::steps::testing::config()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("persistent_volume_size"));
    }

    #[test]
    fn test_assembly_has_no_side_effects() {
        let compute = Arc::new(InMemoryCompute::new());
        let mut p = params("abc", pv_config());
        p.services = Services::new(
            compute.clone(),
            Arc::new(InMemoryConnector::new()),
            Arc::new(RecordingHook::new()),
        );

        build(BuildVariant::PersistentVolume, &p).unwrap();

        assert!(compute.calls().is_empty());
    }
}
