//! Notification service trait and in-memory implementation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use resilience::ServiceError;
use serde::{Deserialize, Serialize};

use crate::fault::FaultInjector;

/// A message to deliver to a recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub template: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Proof of delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReceipt {
    pub notification_id: String,
}

/// Trait for outbound notifications. Delivered messages cannot be recalled.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Sends a notification.
    async fn send(&self, notification: &Notification) -> Result<NotificationReceipt, ServiceError>;
}

/// In-memory notification service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    sent: Arc<RwLock<Vec<Notification>>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault injector for scripting failures.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns every delivered notification.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.read().clone()
    }

    /// Returns the number of delivered notifications.
    pub fn sent_count(&self) -> usize {
        self.sent.read().len()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn send(&self, notification: &Notification) -> Result<NotificationReceipt, ServiceError> {
        self.faults.enter("send").await?;
        let mut sent = self.sent.write();
        sent.push(notification.clone());
        Ok(NotificationReceipt {
            notification_id: format!("NOTE-{:04}", sent.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_records_message() {
        let service = InMemoryNotificationService::new();
        let receipt = service
            .send(&Notification {
                recipient: "ada@example.com".into(),
                template: "order_confirmed".into(),
                data: serde_json::json!({ "order": "o1" }),
            })
            .await
            .unwrap();

        assert_eq!(receipt.notification_id, "NOTE-0001");
        assert_eq!(service.sent_count(), 1);
        assert_eq!(service.sent()[0].template, "order_confirmed");
    }

    #[tokio::test]
    async fn test_send_failure_records_nothing() {
        let service = InMemoryNotificationService::new();
        service
            .faults()
            .fail_always("send", ServiceError::unavailable("smtp down"));
        let result = service
            .send(&Notification {
                recipient: "ada@example.com".into(),
                template: "order_confirmed".into(),
                data: serde_json::Value::Null,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(service.sent_count(), 0);
    }
}
