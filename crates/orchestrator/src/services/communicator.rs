//! Transport to build instances and the provisioning hook that uses it.

use std::sync::Arc;

use async_trait::async_trait;
use classic_core::{CommConfig, KeyPair};
use tokio_util::sync::CancellationToken;

use super::compute::ServiceResult;

/// An established connection to an instance.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Run a shell command and return its exit status.
    async fn run(&self, command: &str) -> ServiceResult<i32>;

    async fn disconnect(&self) -> ServiceResult<()>;
}

/// Establishes communicator connections and produces key material for them.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Generate a temporary key pair tagged with `comment`.
    async fn generate_key_pair(&self, comment: &str) -> ServiceResult<KeyPair>;

    /// Connect to `host`, retrying until the instance answers or `cancel`
    /// fires.
    async fn connect(
        &self,
        host: &str,
        comm: &CommConfig,
        key: &KeyPair,
        cancel: &CancellationToken,
    ) -> ServiceResult<Arc<dyn Communicator>>;
}

/// Runs the user's provisioners over an established connection.
#[async_trait]
pub trait ProvisionHook: Send + Sync {
    async fn provision(
        &self,
        comm: Arc<dyn Communicator>,
        cancel: &CancellationToken,
    ) -> ServiceResult<()>;
}
