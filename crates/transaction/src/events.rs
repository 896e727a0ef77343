//! Transaction lifecycle events.

use chrono::{DateTime, Utc};
use common::{TransactionId, WorkflowEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events that can occur during transaction execution.
///
/// Operation events carry the operation's position in the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    TransactionStarted {
        transaction_id: TransactionId,
        transaction_type: String,
        operation_count: usize,
        started_at: DateTime<Utc>,
    },
    OperationStarted {
        index: usize,
        operation: String,
    },
    OperationCompleted {
        index: usize,
        operation: String,
        result: Value,
        attempts: u32,
        /// The result came from the idempotency store, nothing was executed.
        cached: bool,
    },
    OperationFailed {
        index: usize,
        operation: String,
        error: String,
        attempts: u32,
    },
    TransactionCompleted {
        completed_at: DateTime<Utc>,
    },
    TransactionFailed {
        reason: String,
        failed_at: DateTime<Utc>,
    },
    RollbackStarted {
        /// Number of operations that will be rolled back.
        operations: usize,
    },
    OperationRolledBack {
        index: usize,
        operation: String,
    },
    /// Logged; rollback continues with the next operation.
    RollbackFailed {
        index: usize,
        operation: String,
        error: String,
    },
    TransactionRolledBack {
        completed_at: DateTime<Utc>,
    },
    RollbackIncomplete {
        failed_operations: Vec<String>,
        completed_at: DateTime<Utc>,
    },
}

impl WorkflowEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionStarted { .. } => "TransactionStarted",
            TransactionEvent::OperationStarted { .. } => "OperationStarted",
            TransactionEvent::OperationCompleted { .. } => "OperationCompleted",
            TransactionEvent::OperationFailed { .. } => "OperationFailed",
            TransactionEvent::TransactionCompleted { .. } => "TransactionCompleted",
            TransactionEvent::TransactionFailed { .. } => "TransactionFailed",
            TransactionEvent::RollbackStarted { .. } => "RollbackStarted",
            TransactionEvent::OperationRolledBack { .. } => "OperationRolledBack",
            TransactionEvent::RollbackFailed { .. } => "RollbackFailed",
            TransactionEvent::TransactionRolledBack { .. } => "TransactionRolledBack",
            TransactionEvent::RollbackIncomplete { .. } => "RollbackIncomplete",
        }
    }
}
