//! Distributed transaction coordination.
//!
//! A transaction is an ordered list of `{service, operation, payload}`
//! requests. Each request is resolved against an [`OperationRegistry`]
//! before anything runs, then executed in order through the dependency's
//! circuit breaker with retries. Idempotent operations are deduplicated
//! by a content hash of the request, so the same side effect never runs
//! twice while its record is live. On failure or timeout, completed
//! operations are rolled back in reverse order.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod registry;
pub mod types;
pub mod workflows;

pub use coordinator::{CoordinatorConfig, TransactionCoordinator};
pub use error::{Result, TransactionError};
pub use events::TransactionEvent;
pub use idempotency::{
    Claim, IdempotencyRecord, IdempotencyStatus, InMemoryIdempotencyStore, KeyedStore,
    canonical_json, idempotency_key,
};
pub use registry::{OperationRegistry, ServiceOperation};
pub use types::{
    DistributedTransaction, OperationRequest, OperationResult, OperationStatus,
    TransactionOperation, TransactionResult, TransactionStatus,
};
pub use workflows::{ORDER_CANCELLATION, OrderCancellation, OrderServices, standard_registry};
