//! Network plumbing: IP reservation, API-side SSH key and security list.

use async_trait::async_trait;
use classic_core::{keys, StateBag};
use tokio_util::sync::CancellationToken;

use super::{cancellable, fail, internal, log_cleanup_error, StepEnv};
use crate::core::{Step, StepAction, StepKind};

pub struct StepCreateIpReservation {
    env: StepEnv,
    name: String,
}

impl StepCreateIpReservation {
    pub fn new(env: StepEnv, name: impl Into<String>) -> Self {
        Self {
            env,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Step for StepCreateIpReservation {
    fn name(&self) -> &str {
        "create_ip_reservation"
    }

    fn kind(&self) -> StepKind {
        StepKind::Network
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say("Creating IP reservation...");

        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.create_ip_reservation(&self.name)).await {
            Ok(reservation) => {
                ui.say(format!("Created IP reservation: {}", reservation.name));
                state.put(keys::IP_RESERVATION, reservation);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error creating IP reservation", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(reservation)) = state.take(keys::IP_RESERVATION) else {
            return;
        };
        self.env
            .ui
            .say(format!("Cleaning up IP reservation {}...", reservation.name));
        if let Err(e) = self
            .env
            .services
            .compute
            .delete_ip_reservation(&reservation.name)
            .await
        {
            log_cleanup_error(&self.env.ui, self.name(), "IP reservation", e);
        }
    }
}

/// Registers the public key with the API so new instances trust it.
pub struct StepAddKeyToApi {
    env: StepEnv,
    name: String,
}

impl StepAddKeyToApi {
    pub fn new(env: StepEnv, name: impl Into<String>) -> Self {
        Self {
            env,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Step for StepAddKeyToApi {
    fn name(&self) -> &str {
        "add_ssh_key"
    }

    fn kind(&self) -> StepKind {
        StepKind::Network
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say("Adding SSH keys to API...");

        let public_key = match state.get(keys::KEY_PAIR) {
            Ok(pair) => pair.public_key.clone(),
            Err(e) => return internal(state, ui, self.name(), e),
        };

        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.add_ssh_key(&self.name, &public_key)).await {
            Ok(()) => {
                state.put(keys::API_KEY_NAME, self.name.clone());
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error creating SSH key", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(name)) = state.take(keys::API_KEY_NAME) else {
            return;
        };
        self.env.ui.say("Deleting SSH keys...");
        if let Err(e) = self.env.services.compute.delete_ssh_key(&name).await {
            log_cleanup_error(&self.env.ui, self.name(), "SSH key", e);
        }
    }
}

/// Creates a security list that admits the communicator port.
pub struct StepSecurity {
    env: StepEnv,
    name: String,
}

impl StepSecurity {
    pub fn new(env: StepEnv, name: impl Into<String>) -> Self {
        Self {
            env,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Step for StepSecurity {
    fn name(&self) -> &str {
        "security"
    }

    fn kind(&self) -> StepKind {
        StepKind::Network
    }

    fn resource_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;
        ui.say("Configuring security lists and rules to enable SSH access...");

        let port = self.env.config.comm.port;
        let compute = &self.env.services.compute;
        match cancellable(cancel, compute.create_security_list(&self.name, port)).await {
            Ok(list) => {
                state.put(keys::SECURITY_LIST, list);
                StepAction::Continue
            }
            Err(e) => fail(state, ui, self.name(), "Error creating security list", e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(list)) = state.take(keys::SECURITY_LIST) else {
            return;
        };
        self.env.ui.say("Deleting temporary rules and lists...");
        if let Err(e) = self.env.services.compute.delete_security_list(&list).await {
            log_cleanup_error(&self.env.ui, self.name(), "security list", e);
        }
    }
}
