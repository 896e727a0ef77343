//! Transaction coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{EventSink, InMemoryStateStore, StateStore, TracingEventSink, TransactionId};
use resilience::{ResilientCallExecutor, RetryPolicy, ServiceError};
use serde_json::Value;

use crate::error::TransactionError;
use crate::events::TransactionEvent;
use crate::idempotency::{
    Claim, IdempotencyRecord, IdempotencyStatus, InMemoryIdempotencyStore, KeyedStore,
};
use crate::registry::{OperationRegistry, ServiceOperation};
use crate::types::{
    DistributedTransaction, OperationRequest, OperationStatus, TransactionResult,
};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Used when a caller does not pass a timeout.
    pub default_timeout: Duration,
    /// How long an idempotency record suppresses re-execution.
    pub idempotency_ttl: Duration,
    /// Backoff for operation retries. The retry count comes from each request.
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            retry: RetryPolicy::exponential(3, Duration::from_millis(100)),
        }
    }
}

/// Result of running one operation.
struct Executed {
    result: Value,
    attempts: u32,
    cached: bool,
}

/// Releases an idempotency claim if the owning future is dropped before
/// settling it, e.g. when the transaction times out mid-call.
struct ClaimGuard {
    store: Arc<dyn KeyedStore>,
    key: Option<String>,
}

impl ClaimGuard {
    fn new(store: Arc<dyn KeyedStore>, key: &str) -> Self {
        Self {
            store,
            key: Some(key.to_string()),
        }
    }

    fn disarm(mut self) {
        self.key = None;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.store);
            handle.spawn(async move { store.release(&key).await });
        }
    }
}

/// Runs distributed transactions over registered operations.
pub struct TransactionCoordinator {
    registry: Arc<OperationRegistry>,
    executor: ResilientCallExecutor,
    idempotency: Arc<dyn KeyedStore>,
    store: Arc<dyn StateStore<TransactionId, DistributedTransaction>>,
    sink: Arc<dyn EventSink<TransactionEvent>>,
    config: CoordinatorConfig,
}

impl TransactionCoordinator {
    /// Creates a coordinator with in-memory stores and a tracing sink.
    pub fn new(
        registry: Arc<OperationRegistry>,
        executor: ResilientCallExecutor,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            store: Arc::new(InMemoryStateStore::new()),
            sink: Arc::new(TracingEventSink),
            config,
        }
    }

    /// Replaces the idempotency store.
    pub fn with_idempotency_store(mut self, store: Arc<dyn KeyedStore>) -> Self {
        self.idempotency = store;
        self
    }

    /// Replaces the transaction state store.
    pub fn with_store(
        mut self,
        store: Arc<dyn StateStore<TransactionId, DistributedTransaction>>,
    ) -> Self {
        self.store = store;
        self
    }

    /// Replaces the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink<TransactionEvent>>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the operation registry.
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Returns the idempotency store.
    pub fn idempotency_store(&self) -> &Arc<dyn KeyedStore> {
        &self.idempotency
    }

    /// Loads the latest state of a transaction.
    pub async fn get_transaction(&self, id: TransactionId) -> Option<DistributedTransaction> {
        self.store.get(&id).await
    }

    /// Drops expired idempotency records.
    pub async fn purge_expired(&self) -> usize {
        self.idempotency.purge_expired().await
    }

    /// Runs `operations` in order as one transaction.
    ///
    /// Every operation is resolved first; an unknown one fails the call
    /// with [`TransactionError::UnknownOperation`] before anything runs.
    /// All other failures, including the timeout, are reported through the
    /// returned [`TransactionResult`] after completed operations were
    /// rolled back.
    #[tracing::instrument(skip(self, operations, metadata), fields(operations = operations.len(), transaction_id = tracing::field::Empty))]
    pub async fn execute_transaction(
        &self,
        transaction_type: &str,
        operations: Vec<OperationRequest>,
        metadata: Value,
        timeout: Option<Duration>,
    ) -> Result<TransactionResult, TransactionError> {
        let resolved = operations
            .iter()
            .map(|op| self.registry.resolve(&op.service, &op.operation))
            .collect::<Result<Vec<_>, _>>()?;

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let mut tx = DistributedTransaction::new(transaction_type, operations, metadata, timeout);
        tracing::Span::current().record("transaction_id", tracing::field::display(tx.id));

        metrics::counter!("transaction_executions_total", "transaction_type" => transaction_type.to_string())
            .increment(1);
        let start = Instant::now();

        let started = TransactionEvent::TransactionStarted {
            transaction_id: tx.id,
            transaction_type: transaction_type.to_string(),
            operation_count: tx.operations.len(),
            started_at: Utc::now(),
        };
        self.record(&mut tx, started).await;

        let timed = tokio::time::timeout(timeout, self.run_operations(&mut tx, &resolved)).await;
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) => {
                self.fail_in_flight(&mut tx).await;
                Err(TransactionError::Timeout(timeout))
            }
        };

        let rollback_executed = match outcome {
            Ok(()) => {
                let completed = TransactionEvent::TransactionCompleted {
                    completed_at: Utc::now(),
                };
                self.record(&mut tx, completed).await;
                tracing::info!(transaction_id = %tx.id, "transaction completed");
                false
            }
            Err(error) => {
                tracing::warn!(transaction_id = %tx.id, %error, "transaction failed");
                let failed = TransactionEvent::TransactionFailed {
                    reason: error.to_string(),
                    failed_at: Utc::now(),
                };
                self.record(&mut tx, failed).await;
                self.rollback(&mut tx, &resolved).await;
                true
            }
        };

        metrics::counter!(
            "transaction_finished_total",
            "transaction_type" => transaction_type.to_string(),
            "status" => tx.status.as_str()
        )
        .increment(1);
        metrics::histogram!("transaction_duration_seconds", "transaction_type" => transaction_type.to_string())
            .record(start.elapsed().as_secs_f64());

        Ok(TransactionResult::from_transaction(&tx, rollback_executed))
    }

    async fn run_operations(
        &self,
        tx: &mut DistributedTransaction,
        resolved: &[Arc<dyn ServiceOperation>],
    ) -> Result<(), TransactionError> {
        for (index, operation) in resolved.iter().enumerate() {
            let op = &tx.operations[index];
            let name = op.qualified_name();
            let service = op.service.clone();
            let payload = op.payload.clone();
            let key = op.idempotency_key.clone();
            let max_retries = op.max_retries;

            self.record(
                tx,
                TransactionEvent::OperationStarted {
                    index,
                    operation: name.clone(),
                },
            )
            .await;

            let outcome = self
                .execute_operation(operation.as_ref(), &service, &name, &payload, &key, max_retries)
                .await;

            match outcome {
                Ok(executed) => {
                    tracing::debug!(operation = %name, attempts = executed.attempts, cached = executed.cached, "operation completed");
                    self.record(
                        tx,
                        TransactionEvent::OperationCompleted {
                            index,
                            operation: name,
                            result: executed.result,
                            attempts: executed.attempts,
                            cached: executed.cached,
                        },
                    )
                    .await;
                }
                Err((error, attempts)) => {
                    self.record(
                        tx,
                        TransactionEvent::OperationFailed {
                            index,
                            operation: name,
                            error: error.to_string(),
                            attempts,
                        },
                    )
                    .await;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Runs one operation, consulting the idempotency store first when the
    /// operation allows it. Errors carry the number of attempts made.
    async fn execute_operation(
        &self,
        operation: &dyn ServiceOperation,
        service: &str,
        name: &str,
        payload: &Value,
        key: &str,
        max_retries: u32,
    ) -> Result<Executed, (TransactionError, u32)> {
        if !operation.is_idempotent() {
            return self
                .call(operation, service, name, payload, key, max_retries)
                .await;
        }

        match self.idempotency.claim(key).await {
            Claim::Settled(record) => match record.status {
                IdempotencyStatus::Completed => {
                    tracing::debug!(operation = name, key, "serving cached result");
                    metrics::counter!("idempotency_hits_total", "operation" => name.to_string())
                        .increment(1);
                    Ok(Executed {
                        result: record.result,
                        attempts: 0,
                        cached: true,
                    })
                }
                IdempotencyStatus::Failed => Err((
                    TransactionError::PermanentFailure {
                        operation: name.to_string(),
                        reason: record.error.unwrap_or_default(),
                    },
                    0,
                )),
            },
            Claim::Acquired => {
                let guard = ClaimGuard::new(Arc::clone(&self.idempotency), key);
                let outcome = self
                    .call(operation, service, name, payload, key, max_retries)
                    .await;

                let ttl = self.config.idempotency_ttl;
                let record = match &outcome {
                    Ok(executed) => Some(IdempotencyRecord::completed(
                        key,
                        name,
                        executed.result.clone(),
                        ttl,
                    )),
                    // The service was never reached; nothing to remember.
                    Err((TransactionError::Service { source, .. }, _))
                        if matches!(source.root_cause(), ServiceError::CircuitOpen { .. }) =>
                    {
                        None
                    }
                    Err((error, _)) => {
                        Some(IdempotencyRecord::failed(key, name, error.to_string(), ttl))
                    }
                };
                match record {
                    Some(record) => self.idempotency.settle(record).await,
                    None => self.idempotency.release(key).await,
                }
                guard.disarm();
                outcome
            }
        }
    }

    async fn call(
        &self,
        operation: &dyn ServiceOperation,
        service: &str,
        name: &str,
        payload: &Value,
        key: &str,
        max_retries: u32,
    ) -> Result<Executed, (TransactionError, u32)> {
        let policy = self.config.retry.clone().with_max_retries(max_retries);
        self.executor
            .call_with_metrics(service, &policy, || operation.execute(payload, key))
            .await
            .map(|(result, metrics)| Executed {
                result,
                attempts: metrics.attempts,
                cached: false,
            })
            .map_err(|error: ServiceError| {
                let attempts = error.retry_metrics().map_or(1, |m| m.attempts);
                (
                    TransactionError::Service {
                        operation: name.to_string(),
                        source: error,
                    },
                    attempts,
                )
            })
    }

    /// Marks the operation that was cut off by the timeout as failed.
    async fn fail_in_flight(&self, tx: &mut DistributedTransaction) {
        let in_flight = tx
            .operations
            .iter()
            .position(|op| op.status == OperationStatus::Executing);
        if let Some(index) = in_flight {
            let event = TransactionEvent::OperationFailed {
                index,
                operation: tx.operations[index].qualified_name(),
                error: format!("timed out after {:?}", tx.timeout),
                attempts: tx.operations[index].retry_count + 1,
            };
            self.record(tx, event).await;
        }
    }

    /// Rolls back completed operations, most recent first. A failed
    /// rollback is recorded and the remaining ones still run. Results
    /// served from the idempotency store belong to an earlier execution and
    /// are left alone.
    #[tracing::instrument(skip_all, fields(transaction_id = %tx.id))]
    async fn rollback(&self, tx: &mut DistributedTransaction, resolved: &[Arc<dyn ServiceOperation>]) {
        let targets: Vec<usize> = tx
            .completed_in_reverse()
            .into_iter()
            .filter(|&index| !tx.operations[index].cached)
            .collect();

        self.record(
            tx,
            TransactionEvent::RollbackStarted {
                operations: targets.len(),
            },
        )
        .await;

        for index in targets {
            let op = &tx.operations[index];
            let name = op.qualified_name();
            let payload = op.payload.clone();
            let result = op.result.clone().unwrap_or(Value::Null);
            let key = op.idempotency_key.clone();

            match resolved[index].rollback(&payload, &result).await {
                Ok(()) => {
                    tracing::info!(operation = %name, "operation rolled back");
                    self.idempotency.invalidate(&key).await;
                    self.record(
                        tx,
                        TransactionEvent::OperationRolledBack {
                            index,
                            operation: name,
                        },
                    )
                    .await;
                }
                Err(source) => {
                    let failure = TransactionError::RollbackFailed {
                        operation: name.clone(),
                        source,
                    };
                    tracing::error!(operation = %name, error = %failure, "rollback failed");
                    metrics::counter!("transaction_rollback_failures_total", "operation" => name.clone())
                        .increment(1);
                    self.record(
                        tx,
                        TransactionEvent::RollbackFailed {
                            index,
                            operation: name,
                            error: failure.to_string(),
                        },
                    )
                    .await;
                }
            }
        }

        let finished = if tx.failed_rollbacks.is_empty() {
            TransactionEvent::TransactionRolledBack {
                completed_at: Utc::now(),
            }
        } else {
            tracing::error!(failed = ?tx.failed_rollbacks, "transaction requires manual intervention");
            TransactionEvent::RollbackIncomplete {
                failed_operations: tx.failed_rollbacks.clone(),
                completed_at: Utc::now(),
            }
        };
        self.record(tx, finished).await;
    }

    /// Applies, emits and persists one event.
    async fn record(&self, tx: &mut DistributedTransaction, event: TransactionEvent) {
        tx.apply(&event);
        self.sink.emit(&event);
        self.store.put(tx.id, tx.clone()).await;
    }
}
