//! Event system for image builds
//!
//! This crate provides the event bus and event types used to report build
//! progress to whoever is watching: a terminal, a log shipper, a test.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
