//! Transaction state types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::events::TransactionEvent;
use crate::idempotency::idempotency_key;

/// Default retries for a requested operation.
pub const DEFAULT_OPERATION_RETRIES: u32 = 3;

/// The status of a transaction in its lifecycle.
///
/// ```text
/// Pending ──► Executing ──┬──► Completed
///                         └──► Failed ──► RollingBack ──┬──► RolledBack
///                                                       └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl TransactionStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Executing => "EXECUTING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of one operation within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

/// What a caller asks a transaction to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub service: String,
    pub operation: String,
    pub payload: Value,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_retries() -> u32 {
    DEFAULT_OPERATION_RETRIES
}

impl OperationRequest {
    /// Creates a request with the default retry limit.
    pub fn new(service: impl Into<String>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            payload,
            max_retries: DEFAULT_OPERATION_RETRIES,
        }
    }

    /// Overrides the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns `service:operation`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// One operation as tracked by a running transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOperation {
    pub id: Uuid,
    pub service: String,
    pub operation: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub status: OperationStatus,
    /// Retries used, not counting the first attempt.
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Result was served from the idempotency store.
    pub cached: bool,
}

impl TransactionOperation {
    /// Builds the tracked operation for a request, deriving its idempotency key.
    pub fn from_request(request: OperationRequest) -> Self {
        let idempotency_key =
            idempotency_key(&request.service, &request.operation, &request.payload);
        Self {
            id: Uuid::new_v4(),
            service: request.service,
            operation: request.operation,
            payload: request.payload,
            idempotency_key,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: request.max_retries,
            result: None,
            error: None,
            cached: false,
        }
    }

    /// Returns `service:operation`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// A transaction and the state of each of its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedTransaction {
    pub id: TransactionId,
    pub transaction_type: String,
    pub status: TransactionStatus,
    pub operations: Vec<TransactionOperation>,
    pub metadata: Value,
    pub timeout: Duration,
    pub error: Option<String>,
    /// Operations whose rollback failed.
    pub failed_rollbacks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DistributedTransaction {
    /// Creates a pending transaction.
    pub fn new(
        transaction_type: impl Into<String>,
        requests: Vec<OperationRequest>,
        metadata: Value,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            transaction_type: transaction_type.into(),
            status: TransactionStatus::Pending,
            operations: requests
                .into_iter()
                .map(TransactionOperation::from_request)
                .collect(),
            metadata,
            timeout,
            error: None,
            failed_rollbacks: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Applies an event to the transaction.
    pub fn apply(&mut self, event: &TransactionEvent) {
        let now = Utc::now();
        match event {
            TransactionEvent::TransactionStarted { transaction_id, .. } => {
                self.id = *transaction_id;
                self.status = TransactionStatus::Executing;
            }
            TransactionEvent::OperationStarted { index, .. } => {
                if let Some(op) = self.operations.get_mut(*index) {
                    op.status = OperationStatus::Executing;
                }
            }
            TransactionEvent::OperationCompleted {
                index,
                result,
                attempts,
                cached,
                ..
            } => {
                if let Some(op) = self.operations.get_mut(*index) {
                    op.status = OperationStatus::Completed;
                    op.result = Some(result.clone());
                    op.retry_count = attempts.saturating_sub(1);
                    op.cached = *cached;
                }
            }
            TransactionEvent::OperationFailed {
                index,
                error,
                attempts,
                ..
            } => {
                if let Some(op) = self.operations.get_mut(*index) {
                    op.status = OperationStatus::Failed;
                    op.error = Some(error.clone());
                    op.retry_count = attempts.saturating_sub(1);
                }
            }
            TransactionEvent::TransactionCompleted { completed_at } => {
                self.status = TransactionStatus::Completed;
                self.completed_at = Some(*completed_at);
            }
            TransactionEvent::TransactionFailed { reason, .. } => {
                self.status = TransactionStatus::Failed;
                self.error = Some(reason.clone());
            }
            TransactionEvent::RollbackStarted { .. } => {
                self.status = TransactionStatus::RollingBack;
            }
            TransactionEvent::OperationRolledBack { index, .. } => {
                if let Some(op) = self.operations.get_mut(*index) {
                    op.status = OperationStatus::RolledBack;
                }
            }
            TransactionEvent::RollbackFailed { operation, .. } => {
                self.failed_rollbacks.push(operation.clone());
            }
            TransactionEvent::TransactionRolledBack { completed_at } => {
                self.status = TransactionStatus::RolledBack;
                self.completed_at = Some(*completed_at);
            }
            TransactionEvent::RollbackIncomplete { completed_at, .. } => {
                self.status = TransactionStatus::Failed;
                self.completed_at = Some(*completed_at);
            }
        }
        self.updated_at = now;
    }

    /// Indexes of completed operations, most recent first.
    pub fn completed_in_reverse(&self) -> Vec<usize> {
        self.operations
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, op)| op.status == OperationStatus::Completed)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Per-operation view returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: String,
    pub status: OperationStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub success: bool,
    pub results: Vec<OperationResult>,
    pub error: Option<String>,
    /// True whenever the transaction failed and rollback ran, even with
    /// nothing to roll back.
    pub rollback_executed: bool,
    pub failed_rollbacks: Vec<String>,
}

impl TransactionResult {
    pub(crate) fn from_transaction(tx: &DistributedTransaction, rollback_executed: bool) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
            success: tx.status == TransactionStatus::Completed,
            results: tx
                .operations
                .iter()
                .map(|op| OperationResult {
                    operation: op.qualified_name(),
                    status: op.status,
                    result: op.result.clone(),
                    error: op.error.clone(),
                })
                .collect(),
            error: tx.error.clone(),
            rollback_executed,
            failed_rollbacks: tx.failed_rollbacks.clone(),
        }
    }
}
