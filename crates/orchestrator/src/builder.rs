//! Build entry point.
//!
//! [`Builder`] ties configuration, collaborators and the event bus together:
//! it seeds the state bag, assembles the workflow for the configured variant,
//! runs it and turns the final state into an [`Artifact`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use classic_core::{assemble, keys, Artifact, BuilderConfig, StateBag};
use events::EventBus;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{BuildUi, StepRunner};
use crate::error::{OrchestratorError, Result};
use crate::keys::UI;
use crate::services::Services;
use crate::workflow::{self, Workflow, WorkflowParams};

/// Environment variable carrying the run correlation id.
pub const RUN_ID_ENV: &str = "OCI_CLASSIC_RUN_ID";

/// Environment variable that turns on verbose logging when set.
pub const LOGGING_ENV: &str = "OCI_CLASSIC_LOGGING";

/// Run id from the environment, or a fresh one.
pub fn resolve_run_id() -> String {
    run_id_from(|name| std::env::var(name).ok())
}

pub fn logging_enabled() -> bool {
    logging_from(|name| std::env::var(name).ok())
}

fn run_id_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(RUN_ID_ENV)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn logging_from(lookup: impl Fn(&str) -> Option<String>) -> bool {
    lookup(LOGGING_ENV).is_some_and(|v| !v.is_empty())
}

pub struct Builder {
    config: Arc<BuilderConfig>,
    services: Services,
    bus: Option<EventBus>,
    run_id: Option<String>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Builder {
    pub fn new(config: BuilderConfig, services: Services) -> Self {
        Self {
            config: Arc::new(config),
            services,
            bus: None,
            run_id: None,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Publish build events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use a fixed run id instead of resolving one at run time.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Apply configuration defaults and validate.
    pub fn prepare(&mut self) -> Result<()> {
        Arc::make_mut(&mut self.config).prepare()?;
        Ok(())
    }

    /// Assemble the workflow a run with `run_id` would execute, without
    /// running it.
    pub fn plan(&self, run_id: &str) -> Result<Workflow> {
        workflow::build(self.config.variant(), &self.params(run_id, BuildUi::detached(run_id)))
    }

    fn params(&self, run_id: &str, ui: BuildUi) -> WorkflowParams {
        WorkflowParams {
            run_id: run_id.to_string(),
            config: Arc::clone(&self.config),
            services: self.services.clone(),
            ui,
        }
    }

    /// Run the build once.
    ///
    /// `Ok(None)` means the run stopped early without a failure, for example
    /// because it was cancelled.
    pub async fn run(&self) -> Result<Option<Artifact>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyStarted);
        }

        let run_id = self.run_id.clone().unwrap_or_else(resolve_run_id);
        let ui = match &self.bus {
            Some(bus) => BuildUi::new(bus.clone(), &run_id),
            None => BuildUi::detached(&run_id),
        };

        let variant = self.config.variant();
        info!(run_id = %run_id, variant = %variant, "Starting build");
        let workflow = workflow::build(variant, &self.params(&run_id, ui.clone()))?;

        let mut state = StateBag::new();
        state.put(keys::CONFIG, Arc::clone(&self.config));
        state.put(keys::RUN_ID, run_id.clone());
        state.put(UI, ui.clone());

        let runner = StepRunner::new(workflow)
            .with_ui(ui)
            .with_cancellation(self.cancel.clone());
        let summary = runner.run(&mut state).await?;
        if summary.cancelled {
            warn!(run_id = %run_id, executed = summary.executed, "Build was cancelled");
        }

        let artifact = assemble(&state)?;
        match &artifact {
            Some(artifact) => info!(run_id = %run_id, artifact = %artifact, "Build finished"),
            None => info!(run_id = %run_id, "Build finished without an artifact"),
        }
        Ok(artifact)
    }

    /// Cancel the build. Before `run` this makes `run` return `Ok(None)`
    /// without executing anything; after it finished this does nothing.
    pub fn cancel(&self) {
        info!("Cancelling the step runner...");
        self.cancel.cancel();
    }

    /// Token that cancels this build when fired.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
