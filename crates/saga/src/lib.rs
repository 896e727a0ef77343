//! Saga pattern implementation for order placement.
//!
//! A saga is an ordered list of [`SagaStep`]s, each paired with a
//! compensating action. The [`SagaOrchestrator`] runs the steps one at a
//! time, retrying each under its own policy and routing its outbound call
//! through the dependency's circuit breaker. When a step fails for good,
//! the steps that already completed are compensated in reverse order.
//!
//! The order placement saga follows these steps:
//! 1. Validate the customer
//! 2. Reserve inventory
//! 3. Process payment
//! 4. Create the order record
//! 5. Send a confirmation (fire and forget)

pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod order_placement;
pub mod state;
pub mod step;

pub use context::SagaContext;
pub use error::SagaError;
pub use events::SagaEvent;
pub use orchestrator::{SagaOrchestrator, SagaResult};
pub use order_placement::{OrderPlacementSaga, OrderPlacementServices, PlaceOrder};
pub use state::SagaStatus;
pub use step::SagaStep;
