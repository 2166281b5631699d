//! Communicator steps: connecting, provisioning and removing the temporary
//! key from the instance afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use classic_core::{keys, CommConfig, StateBag};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{cancellable, fail, internal, StepEnv};
use crate::core::{Step, StepAction, StepKind};
use crate::error::ServiceError;
use crate::keys::COMMUNICATOR;

/// Which instance a [`StepConnect`] reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    /// The instance being provisioned
    Instance,
    /// The builder instance of a persistent-volume build
    Builder,
}

pub struct StepConnect {
    env: StepEnv,
    target: ConnectTarget,
    comm: CommConfig,
}

impl StepConnect {
    pub fn new(env: StepEnv, target: ConnectTarget, comm: CommConfig) -> Self {
        Self { env, target, comm }
    }
}

#[async_trait]
impl Step for StepConnect {
    fn name(&self) -> &str {
        match self.target {
            ConnectTarget::Instance => "connect",
            ConnectTarget::Builder => "connect_builder",
        }
    }

    fn kind(&self) -> StepKind {
        StepKind::Connect
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        let host = match state.get(keys::INSTANCE_IP) {
            Ok(host) => host.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };
        let key = match state.get(keys::KEY_PAIR) {
            Ok(key) => key.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        ui.say(format!(
            "Waiting for SSH to become available on {host}:{}...",
            self.comm.port
        ));
        let connector = &self.env.services.connector;
        match cancellable(cancel, connector.connect(&host, &self.comm, &key, cancel)).await {
            Ok(comm) => {
                ui.say("Connected to SSH!");
                state.put(COMMUNICATOR, comm);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error waiting for SSH", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(comm)) = state.take(COMMUNICATOR) else {
            return;
        };
        if let Err(e) = comm.disconnect().await {
            debug!(step = self.name(), error = %e, "Disconnect failed");
        }
    }
}

/// Hands the open connection to the provisioning hook.
pub struct StepProvision {
    env: StepEnv,
}

impl StepProvision {
    pub fn new(env: StepEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl Step for StepProvision {
    fn name(&self) -> &str {
        "provision"
    }

    fn kind(&self) -> StepKind {
        StepKind::Provision
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        let comm = match state.get(COMMUNICATOR) {
            Ok(comm) => Arc::clone(comm),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        ui.say("Running provisioners...");
        let hook = &self.env.services.hook;
        match cancellable(cancel, hook.provision(comm, cancel)).await {
            Ok(()) => StepAction::Continue,
            Err(e) => fail(state, ui, self.name(), "Error in provisioning", e),
        }
    }
}

/// Removes the temporary public key from `authorized_keys` so the captured
/// image does not trust it.
pub struct StepCleanupTempKeys {
    env: StepEnv,
    comment: String,
}

impl StepCleanupTempKeys {
    pub fn new(env: StepEnv, comment: impl Into<String>) -> Self {
        Self {
            env,
            comment: comment.into(),
        }
    }

    fn commands(&self) -> [String; 2] {
        [
            format!(
                "sed -i.bak '/ {}$/d' ~/.ssh/authorized_keys; rm ~/.ssh/authorized_keys.bak",
                self.comment
            ),
            format!(
                "sudo sed -i.bak '/ {}$/d' /root/.ssh/authorized_keys; sudo rm /root/.ssh/authorized_keys.bak",
                self.comment
            ),
        ]
    }
}

#[async_trait]
impl Step for StepCleanupTempKeys {
    fn name(&self) -> &str {
        "cleanup_temp_keys"
    }

    fn kind(&self) -> StepKind {
        StepKind::KeyCleanup
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        // A user-supplied key is theirs to keep.
        if self.env.config.comm.private_key_file.is_some() {
            debug!("Configured private key in use, leaving authorized_keys alone");
            return StepAction::Continue;
        }

        let comm = match state.get(COMMUNICATOR) {
            Ok(comm) => Arc::clone(comm),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        // Removal failures are reported, never fatal. Only cancellation halts.
        ui.say("Trying to remove ephemeral keys from authorized_keys files");
        for command in self.commands() {
            match cancellable(cancel, comm.run(&command)).await {
                Ok(0) => {}
                Ok(code) => ui.error(format!(
                    "Error removing temporary key: command exited with status {code}"
                )),
                Err(ServiceError::Cancelled) => {
                    return fail(
                        state,
                        ui,
                        self.name(),
                        "Error removing temporary key",
                        ServiceError::Cancelled,
                    )
                }
                Err(e) => {
                    warn!(step = self.name(), error = %e, "Could not remove temporary key");
                    ui.error(format!("Error removing temporary key: {e}"));
                }
            }
        }
        StepAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Communicator, Connector, ServiceResult};

    /// Drops the connection for unprivileged commands, passes `sudo` through.
    struct Unreachable(Arc<dyn Communicator>);

    #[async_trait]
    impl Communicator for Unreachable {
        async fn run(&self, command: &str) -> ServiceResult<i32> {
            if command.starts_with("sudo") {
                self.0.run(command).await
            } else {
                Err(ServiceError::Transport("connection reset".into()))
            }
        }

        async fn disconnect(&self) -> ServiceResult<()> {
            self.0.disconnect().await
        }
    }
    use crate::steps::testing::{config, fixture, fixture_with};

    async fn seeded(fx: &crate::steps::testing::Fixture) -> StateBag {
        let mut state = StateBag::new();
        state.put(keys::INSTANCE_IP, "129.150.0.1".to_string());
        state.put(
            keys::KEY_PAIR,
            fx.connector.generate_key_pair("oci-classic_abc").await.unwrap(),
        );
        state
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let fx = fixture();
        let mut state = seeded(&fx).await;
        let step = StepConnect::new(fx.env.clone(), ConnectTarget::Instance, fx.env.config.comm.clone());

        assert_eq!(step.execute(&mut state, &fx.cancel).await, StepAction::Continue);
        assert_eq!(fx.connector.hosts(), vec!["129.150.0.1"]);
        assert!(state.contains(COMMUNICATOR.name()));

        step.cleanup(&mut state).await;
        assert_eq!(fx.connector.disconnects(), 1);
        assert!(!state.contains(COMMUNICATOR.name()));
    }

    #[tokio::test]
    async fn test_connect_failure_marks_error() {
        let fx = fixture();
        fx.connector
            .fail_connect(ServiceError::Transport("connection refused".into()));
        let mut state = seeded(&fx).await;
        let step = StepConnect::new(fx.env.clone(), ConnectTarget::Builder, fx.env.config.comm.clone());

        assert_eq!(step.execute(&mut state, &fx.cancel).await, StepAction::Halt);
        let failure = state.get(keys::ERROR).unwrap();
        assert_eq!(failure.step, "connect_builder");
        assert!(failure.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_connect_returns_promptly_on_cancel() {
        let fx = fixture();
        fx.connector.hang_on_connect();
        let mut state = seeded(&fx).await;
        let step = StepConnect::new(fx.env.clone(), ConnectTarget::Instance, fx.env.config.comm.clone());

        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });

        assert_eq!(step.execute(&mut state, &fx.cancel).await, StepAction::Halt);
        assert!(state.get_ok(keys::ERROR).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_runs_hook() {
        let fx = fixture();
        let mut state = seeded(&fx).await;
        let connect = StepConnect::new(fx.env.clone(), ConnectTarget::Instance, fx.env.config.comm.clone());
        connect.execute(&mut state, &fx.cancel).await;

        let provision = StepProvision::new(fx.env.clone());
        assert_eq!(
            provision.execute(&mut state, &fx.cancel).await,
            StepAction::Continue
        );
        assert_eq!(fx.hook.runs(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_temp_keys_runs_sed() {
        let fx = fixture();
        let mut state = seeded(&fx).await;
        let connect = StepConnect::new(fx.env.clone(), ConnectTarget::Instance, fx.env.config.comm.clone());
        connect.execute(&mut state, &fx.cancel).await;

        let step = StepCleanupTempKeys::new(fx.env.clone(), "oci-classic_abc");
        assert_eq!(step.execute(&mut state, &fx.cancel).await, StepAction::Continue);

        let commands = fx.connector.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("/ oci-classic_abc$/d"));
        assert!(commands[1].starts_with("sudo"));
    }

    #[tokio::test]
    async fn test_cleanup_temp_keys_tolerates_failures() {
        let fx = fixture();
        let mut state = seeded(&fx).await;
        let connect = StepConnect::new(fx.env.clone(), ConnectTarget::Instance, fx.env.config.comm.clone());
        connect.execute(&mut state, &fx.cancel).await;

        // Both commands fail: one with a status, one on the transport.
        fx.connector.exit_code_for("sudo sed", 1);
        let comm = state.take(COMMUNICATOR).unwrap().unwrap();
        state.put(COMMUNICATOR, Arc::new(Unreachable(comm)) as Arc<dyn Communicator>);

        let step = StepCleanupTempKeys::new(fx.env.clone(), "oci-classic_abc");
        assert_eq!(step.execute(&mut state, &fx.cancel).await, StepAction::Continue);
        assert!(state.get_ok(keys::ERROR).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_temp_keys_skips_user_key() {
        let mut cfg = config();
        cfg.comm.private_key_file = Some("/home/me/.ssh/id_rsa".into());
        let fx = fixture_with(cfg);
        let mut state = StateBag::new();

        let step = StepCleanupTempKeys::new(fx.env.clone(), "oci-classic_abc");

        assert_eq!(step.execute(&mut state, &fx.cancel).await, StepAction::Continue);
        assert!(fx.connector.commands().is_empty());
    }
}
