//! Core abstractions for the step execution model.
//!
//! - [`Step`] - Trait every unit of work implements
//! - [`StepRunner`] - Sequential runner with reverse cleanup and cancellation
//! - [`BuildUi`] - Output sink with sequence guarantees

mod runner;
mod step;
mod ui;

pub use runner::{RunSummary, StepRunner};
pub use step::{Step, StepAction, StepKind};
pub use ui::BuildUi;
