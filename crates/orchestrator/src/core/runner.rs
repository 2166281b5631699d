//! Sequential step runner.
//!
//! The runner executes a [`Workflow`] front to back against one state bag,
//! stops at the first halt or at the first step boundary after cancellation,
//! then cleans up every executed step in reverse order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use classic_core::{keys, StateBag, StepFailure};
use events::{Event, StepOutcome};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::workflow::Workflow;

use super::step::{Step, StepAction};
use super::ui::BuildUi;

/// What happened during a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of steps whose execute was invoked
    pub executed: usize,
    /// Step that returned halt, if any
    pub halted_at: Option<String>,
    /// Whether cancellation was requested before the run finished
    pub cancelled: bool,
}

/// Drives a workflow to completion.
///
/// A runner is single-use. It is `Sync`, so one task can `run` while another
/// holds a reference and calls [`StepRunner::cancel`].
pub struct StepRunner {
    workflow: Workflow,
    cancel: CancellationToken,
    ui: BuildUi,
    started: AtomicBool,
}

impl StepRunner {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            cancel: CancellationToken::new(),
            ui: BuildUi::detached(""),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_ui(mut self, ui: BuildUi) -> Self {
        self.ui = ui;
        self
    }

    /// Use an externally owned token, so cancellation can be requested before
    /// the runner even exists.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Request cancellation. Safe to call at any time, from any task.
    ///
    /// The runner notices at the next step boundary; the step currently
    /// executing sees the same token and is expected to return promptly.
    pub fn cancel(&self) {
        info!(run_id = %self.ui.run_id(), "Cancelling the step runner...");
        self.cancel.cancel();
    }

    /// Execute the workflow.
    ///
    /// Returns the failure marker as the error if any step wrote one. Cleanup
    /// has always finished by the time this returns.
    pub async fn run(&self, state: &mut StateBag) -> Result<RunSummary> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyStarted);
        }

        let run_id = self.ui.run_id().to_string();
        let steps = self.workflow.steps();

        info!(run_id = %run_id, steps = steps.len(), "Starting workflow");
        self.ui.emit(Event::RunStarted {
            run_id: run_id.clone(),
            steps: self.workflow.step_names(),
        });

        let mut executed = 0;
        let mut halted_at = None;
        let mut cancelled = false;

        for (index, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(
                    run_id = %run_id,
                    next_step = step.name(),
                    "Cancellation observed, stopping before step"
                );
                self.ui.emit(Event::RunCancelled {
                    run_id: run_id.clone(),
                    next_step: Some(step.name().to_string()),
                });
                cancelled = true;
                break;
            }

            debug!(run_id = %run_id, step = step.name(), index, "Executing step");
            self.ui.emit(Event::StepStarted {
                run_id: run_id.clone(),
                step: step.name().to_string(),
                index,
            });

            executed += 1;
            let action = self.execute_step(step.as_ref(), state).await;

            self.ui.emit(Event::StepCompleted {
                run_id: run_id.clone(),
                step: step.name().to_string(),
                outcome: match action {
                    StepAction::Continue => StepOutcome::Continue,
                    StepAction::Halt => StepOutcome::Halt,
                },
            });

            if action == StepAction::Halt {
                if let Ok(Some(failure)) = state.get_ok(keys::ERROR) {
                    self.ui.emit(Event::StepFailed {
                        run_id: run_id.clone(),
                        step: failure.step.clone(),
                        message: failure.message.clone(),
                    });
                }
                debug!(run_id = %run_id, step = step.name(), "Step halted the workflow");
                halted_at = Some(step.name().to_string());
                break;
            }
        }

        // Cancellation that arrived during the step that stopped the run.
        let completed = halted_at.is_none() && executed == steps.len();
        cancelled |= !completed && self.cancel.is_cancelled();

        self.cleanup(&steps[..executed], state).await;

        let failure = state.get_ok(keys::ERROR)?.cloned();
        self.ui.emit(Event::RunFinished {
            run_id: run_id.clone(),
            success: failure.is_none(),
            executed,
        });

        match failure {
            Some(failure) => {
                error!(
                    run_id = %run_id,
                    step = %failure.step,
                    internal = failure.is_internal(),
                    error = %failure.message,
                    "Workflow failed"
                );
                Err(failure.into())
            }
            None => {
                info!(run_id = %run_id, executed, cancelled, "Workflow finished");
                Ok(RunSummary {
                    executed,
                    halted_at,
                    cancelled,
                })
            }
        }
    }

    /// Run a step's execute, turning a panic into a failure marker.
    async fn execute_step(&self, step: &dyn Step, state: &mut StateBag) -> StepAction {
        let outcome = AssertUnwindSafe(step.execute(state, &self.cancel))
            .catch_unwind()
            .await;

        match outcome {
            Ok(action) => action,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(step = step.name(), panic = %message, "Step panicked during execute");
                state.put(
                    keys::ERROR,
                    StepFailure::internal(step.name(), format!("step panicked: {message}")),
                );
                StepAction::Halt
            }
        }
    }

    /// Clean up executed steps, last one first. Nothing here may stop the
    /// remaining cleanups.
    async fn cleanup(&self, executed: &[Box<dyn Step>], state: &mut StateBag) {
        let run_id = self.ui.run_id();

        for step in executed.iter().rev() {
            debug!(run_id = %run_id, step = step.name(), "Cleaning up step");

            match AssertUnwindSafe(step.cleanup(state)).catch_unwind().await {
                Ok(()) => self.ui.emit(Event::StepCleanedUp {
                    run_id: run_id.to_string(),
                    step: step.name().to_string(),
                }),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(
                        run_id = %run_id,
                        step = step.name(),
                        panic = %message,
                        "Step cleanup panicked, continuing with remaining cleanups"
                    );
                    self.ui.emit(Event::CleanupFailed {
                        run_id: run_id.to_string(),
                        step: step.name().to_string(),
                        message,
                    });
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Execute(usize),
        Cleanup(usize),
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Continue,
        Halt,
        Fail,
        Broken,
        Panic,
        PanicInCleanup,
        CancelDuring,
    }

    struct Scripted {
        index: usize,
        name: String,
        behaviour: Behaviour,
        log: Arc<Mutex<Vec<Call>>>,
        token: Option<CancellationToken>,
    }

    #[async_trait]
    impl Step for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, state: &mut StateBag, _cancel: &CancellationToken) -> StepAction {
            self.log.lock().unwrap().push(Call::Execute(self.index));
            match self.behaviour {
                Behaviour::Continue | Behaviour::PanicInCleanup => StepAction::Continue,
                Behaviour::Halt => StepAction::Halt,
                Behaviour::Fail => {
                    state.put(keys::ERROR, StepFailure::new(&self.name, "boom"));
                    StepAction::Halt
                }
                Behaviour::Broken => {
                    state.put(
                        keys::ERROR,
                        StepFailure::internal(&self.name, "state key `instance_ip` is missing"),
                    );
                    StepAction::Halt
                }
                Behaviour::Panic => panic!("exploded"),
                Behaviour::CancelDuring => {
                    if let Some(ref token) = self.token {
                        token.cancel();
                    }
                    StepAction::Continue
                }
            }
        }

        async fn cleanup(&self, _state: &mut StateBag) {
            self.log.lock().unwrap().push(Call::Cleanup(self.index));
            if matches!(self.behaviour, Behaviour::PanicInCleanup) {
                panic!("cleanup exploded");
            }
        }
    }

    fn workflow(
        behaviours: &[Behaviour],
        log: &Arc<Mutex<Vec<Call>>>,
        token: Option<CancellationToken>,
    ) -> Workflow {
        let steps: Vec<Box<dyn Step>> = behaviours
            .iter()
            .enumerate()
            .map(|(index, behaviour)| {
                Box::new(Scripted {
                    index,
                    name: format!("step_{index}"),
                    behaviour: *behaviour,
                    log: Arc::clone(log),
                    token: token.clone(),
                }) as Box<dyn Step>
            })
            .collect();
        Workflow::new(steps)
    }

    fn calls(log: &Arc<Mutex<Vec<Call>>>) -> Vec<Call> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_all_steps_continue() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = StepRunner::new(workflow(&[Behaviour::Continue; 3], &log, None));
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();

        assert_eq!(summary.executed, 3);
        assert!(summary.halted_at.is_none());
        assert!(!summary.cancelled);
        assert_eq!(
            calls(&log),
            vec![
                Call::Execute(0),
                Call::Execute(1),
                Call::Execute(2),
                Call::Cleanup(2),
                Call::Cleanup(1),
                Call::Cleanup(0),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_workflow() {
        let runner = StepRunner::new(Workflow::new(Vec::new()));
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();

        assert_eq!(summary.executed, 0);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_and_cleans_up_in_reverse() {
        for failing in 0..4 {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut behaviours = vec![Behaviour::Continue; 4];
            behaviours[failing] = Behaviour::Fail;
            let runner = StepRunner::new(workflow(&behaviours, &log, None));
            let mut state = StateBag::new();

            let err = runner.run(&mut state).await.unwrap_err();
            match err {
                OrchestratorError::StepFailed(failure) => {
                    assert_eq!(failure.step, format!("step_{failing}"))
                }
                other => panic!("unexpected error: {other:?}"),
            }

            let mut expected: Vec<Call> = (0..=failing).map(Call::Execute).collect();
            expected.extend((0..=failing).rev().map(Call::Cleanup));
            assert_eq!(calls(&log), expected);
        }
    }

    #[tokio::test]
    async fn test_internal_marker_is_not_a_build_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviours = [Behaviour::Continue, Behaviour::Broken, Behaviour::Continue];
        let runner = StepRunner::new(workflow(&behaviours, &log, None));
        let mut state = StateBag::new();

        let err = runner.run(&mut state).await.unwrap_err();

        assert!(!err.is_build_failure());
        match err {
            OrchestratorError::Internal(failure) => assert_eq!(failure.step, "step_1"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            calls(&log),
            vec![
                Call::Execute(0),
                Call::Execute(1),
                Call::Cleanup(1),
                Call::Cleanup(0)
            ]
        );
    }

    #[tokio::test]
    async fn test_step_with_missing_state_surfaces_as_internal() {
        let fx = crate::steps::testing::fixture();
        let attach = crate::steps::StepAttachVolume::new(
            fx.env.clone(),
            "master-storage_abc",
            2,
            keys::BUILDER_INSTANCE_INFO,
        );
        let runner = StepRunner::new(Workflow::new(vec![Box::new(attach) as Box<dyn Step>]));
        let mut state = StateBag::new();

        let err = runner.run(&mut state).await.unwrap_err();

        assert!(!err.is_build_failure());
        assert!(matches!(err, OrchestratorError::Internal(_)));
        assert!(err.to_string().contains("builder_instance_info"));
    }

    #[tokio::test]
    async fn test_halt_without_marker_is_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviours = [Behaviour::Continue, Behaviour::Halt, Behaviour::Continue];
        let runner = StepRunner::new(workflow(&behaviours, &log, None));
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();

        assert_eq!(summary.executed, 2);
        assert_eq!(summary.halted_at.as_deref(), Some("step_1"));
        assert_eq!(
            calls(&log),
            vec![
                Call::Execute(0),
                Call::Execute(1),
                Call::Cleanup(1),
                Call::Cleanup(0)
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = StepRunner::new(workflow(&[Behaviour::Continue; 3], &log, None));
        runner.cancel();
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();

        assert_eq!(summary.executed, 0);
        assert!(summary.cancelled);
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_step_k() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let behaviours = [
            Behaviour::Continue,
            Behaviour::CancelDuring,
            Behaviour::Continue,
            Behaviour::Continue,
        ];
        let runner = StepRunner::new(workflow(&behaviours, &log, Some(token.clone())))
            .with_cancellation(token);
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.executed, 2);
        assert_eq!(
            calls(&log),
            vec![
                Call::Execute(0),
                Call::Execute(1),
                Call::Cleanup(1),
                Call::Cleanup(0)
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_during_last_step_is_not_a_cancelled_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let behaviours = [Behaviour::Continue, Behaviour::CancelDuring];
        let runner = StepRunner::new(workflow(&behaviours, &log, Some(token.clone())))
            .with_cancellation(token);
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();

        assert!(!summary.cancelled);
        assert_eq!(summary.executed, 2);
        assert!(summary.halted_at.is_none());
    }

    #[tokio::test]
    async fn test_cancel_from_another_task() {
        struct Blocking {
            started: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl Step for Blocking {
            fn name(&self) -> &str {
                "blocking"
            }

            async fn execute(&self, _state: &mut StateBag, cancel: &CancellationToken) -> StepAction {
                self.started.notify_one();
                cancel.cancelled().await;
                StepAction::Halt
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(tokio::sync::Notify::new());
        let mut steps = workflow(&[Behaviour::Continue], &log, None).into_steps();
        steps.push(Box::new(Blocking {
            started: Arc::clone(&started),
        }));
        steps.extend(workflow(&[Behaviour::Continue], &log, None).into_steps());
        let runner = Arc::new(StepRunner::new(Workflow::new(steps)));

        let handle = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                let mut state = StateBag::new();
                runner.run(&mut state).await
            })
        };

        started.notified().await;
        runner.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.halted_at.as_deref(), Some("blocking"));
        assert_eq!(calls(&log), vec![Call::Execute(0), Call::Cleanup(0)]);
    }

    #[tokio::test]
    async fn test_cancel_after_finish_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = StepRunner::new(workflow(&[Behaviour::Continue; 2], &log, None));
        let mut state = StateBag::new();

        let summary = runner.run(&mut state).await.unwrap();
        runner.cancel();

        assert!(!summary.cancelled);
        assert_eq!(calls(&log).len(), 4);
    }

    #[tokio::test]
    async fn test_panic_in_execute_still_cleans_up() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviours = [Behaviour::Continue, Behaviour::Panic, Behaviour::Continue];
        let runner = StepRunner::new(workflow(&behaviours, &log, None));
        let mut state = StateBag::new();

        let err = runner.run(&mut state).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Internal(_)));
        assert!(err.to_string().contains("exploded"));
        assert_eq!(
            calls(&log),
            vec![
                Call::Execute(0),
                Call::Execute(1),
                Call::Cleanup(1),
                Call::Cleanup(0)
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_in_cleanup_does_not_block_earlier_cleanups() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviours = [
            Behaviour::Continue,
            Behaviour::PanicInCleanup,
            Behaviour::Continue,
        ];
        let runner = StepRunner::new(workflow(&behaviours, &log, None));
        let mut state = StateBag::new();

        runner.run(&mut state).await.unwrap();

        let cleanups: Vec<Call> = calls(&log)
            .into_iter()
            .filter(|c| matches!(c, Call::Cleanup(_)))
            .collect();
        assert_eq!(
            cleanups,
            vec![Call::Cleanup(2), Call::Cleanup(1), Call::Cleanup(0)]
        );
    }

    #[tokio::test]
    async fn test_runner_is_single_use() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = StepRunner::new(workflow(&[Behaviour::Continue], &log, None));
        let mut state = StateBag::new();

        runner.run(&mut state).await.unwrap();
        let err = runner.run(&mut state).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::AlreadyStarted));
        assert_eq!(calls(&log).len(), 2);
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let bus = events::EventBus::new();
        let mut rx = bus.subscribe();
        let log = Arc::new(Mutex::new(Vec::new()));
        let behaviours = [Behaviour::Continue, Behaviour::Fail];
        let runner = StepRunner::new(workflow(&behaviours, &log, None))
            .with_ui(BuildUi::new(bus, "abc"));
        let mut state = StateBag::new();

        let _ = runner.run(&mut state).await;

        let mut kinds = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            kinds.push(match envelope.event {
                Event::RunStarted { .. } => "run.started",
                Event::StepStarted { .. } => "step.started",
                Event::StepCompleted { .. } => "step.completed",
                Event::StepFailed { .. } => "step.failed",
                Event::StepCleanedUp { .. } => "step.cleaned_up",
                Event::RunFinished { success, .. } => {
                    assert!(!success);
                    "run.finished"
                }
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "run.started",
                "step.started",
                "step.completed",
                "step.started",
                "step.completed",
                "step.failed",
                "step.cleaned_up",
                "step.cleaned_up",
                "run.finished",
            ]
        );
    }
}
