//! Shared types for the order orchestration workspace.
//!
//! Identifiers and value objects used across crates, plus the two seams
//! every orchestrator writes through: an [`EventSink`] for observability
//! events and a [`StateStore`] for workflow snapshots.

pub mod events;
pub mod store;
pub mod types;

pub use events::{EventSink, RecordingEventSink, TracingEventSink, WorkflowEvent};
pub use store::{InMemoryStateStore, StateStore};
pub use types::{CustomerId, Money, OrderId, ProductId, SagaId, TransactionId};
