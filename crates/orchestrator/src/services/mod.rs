pub mod communicator;
pub mod compute;
pub mod memory;

use std::sync::Arc;

pub use communicator::{Communicator, Connector, ProvisionHook};
pub use compute::{ComputeClient, InstanceSpec, ServiceResult, VolumeSpec};
pub use memory::{InMemoryCompute, InMemoryConnector, RecordingHook};

/// Read-only collaborator handles shared by every step of a run.
#[derive(Clone)]
pub struct Services {
    pub compute: Arc<dyn ComputeClient>,
    pub connector: Arc<dyn Connector>,
    pub hook: Arc<dyn ProvisionHook>,
}

impl Services {
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        connector: Arc<dyn Connector>,
        hook: Arc<dyn ProvisionHook>,
    ) -> Self {
        Self {
            compute,
            connector,
            hook,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
