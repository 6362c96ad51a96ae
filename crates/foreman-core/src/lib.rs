//! Core types, error handling, and the event bus for the Foreman control plane.
//!
//! This crate has no knowledge of tasks or scheduling; it provides the pieces
//! every other Foreman crate shares.
//!
//! # Main types
//!
//! - [`ForemanError`] — Unified error enum for all Foreman crates.
//! - [`ForemanResult`] — Convenience alias for `Result<T, ForemanError>`.
//! - [`TaskId`] / [`WorkerId`] — Identifiers for tasks and workers.
//! - [`Event`] / [`EventType`] — Immutable records of what happened in a run.
//! - [`EventBus`] — Synchronous publish/subscribe channel with failure isolation.
//! - [`EventRecorder`] / [`ConsoleSink`] — Ready-made subscribers for history and logging.

/// Error type shared by all Foreman crates.
pub mod error;
/// Event record and the event-type vocabulary.
pub mod event;
/// Synchronous publish/subscribe bus.
pub mod event_bus;
/// Task and worker identifiers.
pub mod ids;
/// History and console subscribers.
pub mod sink;

pub use error::{ForemanError, ForemanResult};
pub use event::{Event, EventType};
pub use event_bus::{EventBus, EventHandler, Subscription};
pub use ids::{TaskId, WorkerId};
pub use sink::{read_jsonl, ConsoleSink, EventRecorder};
