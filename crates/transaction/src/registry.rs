//! Dispatch table from `service:operation` to an executable operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use resilience::ServiceError;
use serde_json::Value;

use crate::error::TransactionError;

/// An operation a transaction can run, with the action that undoes it.
#[async_trait]
pub trait ServiceOperation: Send + Sync {
    /// Performs the operation. `idempotency_key` identifies the request and
    /// may be forwarded to services that deduplicate on their side.
    async fn execute(&self, payload: &Value, idempotency_key: &str) -> Result<Value, ServiceError>;

    /// Undoes a completed execution given its payload and result.
    async fn rollback(&self, payload: &Value, result: &Value) -> Result<(), ServiceError>;

    /// Whether repeated requests may be served from the idempotency store.
    fn is_idempotent(&self) -> bool {
        true
    }
}

/// Registered operations keyed by `service:operation`.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn ServiceOperation>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.names())
            .finish()
    }
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `operation` as `service:name`, replacing any previous entry.
    pub fn register(
        &mut self,
        service: &str,
        name: &str,
        operation: Arc<dyn ServiceOperation>,
    ) -> &mut Self {
        self.operations.insert(format!("{service}:{name}"), operation);
        self
    }

    /// Looks up an operation.
    pub fn resolve(
        &self,
        service: &str,
        operation: &str,
    ) -> Result<Arc<dyn ServiceOperation>, TransactionError> {
        self.operations
            .get(&format!("{service}:{operation}"))
            .cloned()
            .ok_or_else(|| TransactionError::UnknownOperation {
                service: service.to_string(),
                operation: operation.to_string(),
            })
    }

    /// Returns true if `service:operation` is registered.
    pub fn contains(&self, service: &str, operation: &str) -> bool {
        self.operations
            .contains_key(&format!("{service}:{operation}"))
    }

    /// Returns every registered name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ServiceOperation for Echo {
        async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
            Ok(payload.clone())
        }

        async fn rollback(&self, _payload: &Value, _result: &Value) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let mut registry = OperationRegistry::new();
        registry
            .register("echo", "say", Arc::new(Echo))
            .register("echo", "shout", Arc::new(Echo));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("echo", "say"));
        assert_eq!(registry.names(), vec!["echo:say", "echo:shout"]);

        let op = registry.resolve("echo", "say").unwrap();
        let out = op.execute(&serde_json::json!({"x": 1}), "k").await.unwrap();
        assert_eq!(out["x"], 1);
        assert!(op.is_idempotent());
    }

    #[test]
    fn test_unknown_operation() {
        let registry = OperationRegistry::new();
        let err = registry.resolve("billing", "charge").err().unwrap();
        assert!(matches!(
            &err,
            TransactionError::UnknownOperation { service, operation }
                if service == "billing" && operation == "charge"
        ));
        assert_eq!(err.to_string(), "Unknown operation 'billing:charge'");
    }
}
