use std::path::PathBuf;

use async_trait::async_trait;
use classic_core::{keys, KeyPair, StateBag};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{cancellable, fail, halt, StepEnv};
use crate::core::{Step, StepAction, StepKind};

/// Provides the SSH key pair the communicator authenticates with.
///
/// Uses the configured private key when there is one, otherwise asks the
/// connector for a temporary pair. In debug mode the private key is also
/// written to disk so the operator can reach the instance by hand.
pub struct StepKeyPair {
    env: StepEnv,
    comment: String,
    debug_key_path: PathBuf,
}

impl StepKeyPair {
    pub fn new(env: StepEnv, comment: impl Into<String>, debug_key_path: impl Into<PathBuf>) -> Self {
        Self {
            env,
            comment: comment.into(),
            debug_key_path: debug_key_path.into(),
        }
    }

    async fn load_private_key(path: &str) -> std::io::Result<KeyPair> {
        let private_key = fs::read_to_string(path).await?;
        let public_key = fs::read_to_string(format!("{path}.pub")).await?;
        Ok(KeyPair {
            private_key,
            public_key: public_key.trim().to_string(),
        })
    }
}

#[async_trait]
impl Step for StepKeyPair {
    fn name(&self) -> &str {
        "key_pair"
    }

    fn kind(&self) -> StepKind {
        StepKind::Credentials
    }

    async fn execute(&self, state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
        let ui = &self.env.ui;

        let key_pair = match self.env.config.comm.private_key_file.as_deref() {
            Some(path) => {
                ui.say(format!("Using existing SSH private key {path}"));
                match Self::load_private_key(path).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        return halt(
                            state,
                            ui,
                            self.name(),
                            format!("Error loading configured private key file {path}: {e}"),
                        )
                    }
                }
            }
            None => {
                ui.say("Creating temporary SSH key for instance...");
                let generated = cancellable(
                    cancel,
                    self.env.services.connector.generate_key_pair(&self.comment),
                )
                .await;
                match generated {
                    Ok(pair) => pair,
                    Err(e) => {
                        return fail(state, ui, self.name(), "Error creating temporary SSH key", e)
                    }
                }
            }
        };

        if self.env.config.debug {
            ui.say(format!(
                "Saving key for debug purposes: {}",
                self.debug_key_path.display()
            ));
            if let Err(e) = fs::write(&self.debug_key_path, &key_pair.private_key).await {
                return halt(
                    state,
                    ui,
                    self.name(),
                    format!("Error saving debug key: {e}"),
                );
            }
            state.put(keys::DEBUG_KEY_PATH, self.debug_key_path.clone());
        }

        state.put(keys::KEY_PAIR, key_pair);
        StepAction::Continue
    }

    async fn cleanup(&self, state: &mut StateBag) {
        let Ok(Some(path)) = state.take(keys::DEBUG_KEY_PATH) else {
            return;
        };
        debug!(path = %path.display(), "Removing debug key");
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                self.env
                    .ui
                    .error(format!("Error removing debug key {}: {e}", path.display()));
            }
        }
    }
}
