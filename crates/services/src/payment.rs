//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CustomerId, Money, OrderId};
use parking_lot::RwLock;
use resilience::ServiceError;
use serde::{Deserialize, Serialize};

use crate::fault::FaultInjector;

/// A request to charge a customer for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub payment_method: String,
}

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
}

/// Result of a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
}

/// Lifecycle of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Captured,
    Refunded,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a customer for an order.
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentResult, ServiceError>;

    /// Refunds a previously captured payment. Refunding twice returns the same refund.
    async fn refund(&self, payment_id: &str) -> Result<RefundResult, ServiceError>;
}

#[derive(Debug)]
struct Payment {
    amount: Money,
    status: PaymentStatus,
    refund_id: Option<String>,
}

#[derive(Debug)]
struct InMemoryPaymentState {
    payments: HashMap<String, Payment>,
    accepted_methods: Vec<String>,
    next_id: u32,
}

impl Default for InMemoryPaymentState {
    fn default() -> Self {
        Self {
            payments: HashMap::new(),
            accepted_methods: vec!["card".to_string(), "wallet".to_string()],
            next_id: 0,
        }
    }
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service accepting `card` and `wallet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault injector for scripting failures.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Configures every charge call to be declined.
    pub fn set_fail_on_charge(&self, fail: bool) {
        if fail {
            self.faults
                .fail_always("charge", ServiceError::PaymentDeclined("forced".into()));
        } else {
            self.faults.clear("charge");
        }
    }

    /// Returns the number of captured (not refunded) payments.
    pub fn payment_count(&self) -> usize {
        self.state
            .read()
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Captured)
            .count()
    }

    /// Returns the status of a payment.
    pub fn payment_status(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.state.read().payments.get(payment_id).map(|p| p.status)
    }

    /// Returns the total amount currently captured.
    pub fn captured_total(&self) -> Money {
        self.state
            .read()
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Captured)
            .map(|p| p.amount)
            .sum()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentResult, ServiceError> {
        self.faults.enter("charge").await?;
        let mut state = self.state.write();

        if !state
            .accepted_methods
            .iter()
            .any(|m| m == &request.payment_method)
        {
            return Err(ServiceError::InvalidPaymentMethod(
                request.payment_method.clone(),
            ));
        }
        if !request.amount.is_positive() {
            return Err(ServiceError::InvalidPayload(format!(
                "charge amount must be positive, got {}",
                request.amount
            )));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(
            payment_id.clone(),
            Payment {
                amount: request.amount,
                status: PaymentStatus::Captured,
                refund_id: None,
            },
        );

        Ok(PaymentResult { payment_id })
    }

    async fn refund(&self, payment_id: &str) -> Result<RefundResult, ServiceError> {
        self.faults.enter("refund").await?;
        let mut state = self.state.write();
        let payment = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| ServiceError::NotFound(format!("payment {payment_id}")))?;

        let refund_id = payment
            .refund_id
            .get_or_insert_with(|| format!("REF-{}", payment_id.trim_start_matches("PAY-")))
            .clone();
        payment.status = PaymentStatus::Refunded;
        Ok(RefundResult { refund_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, cents: i64) -> ChargeRequest {
        ChargeRequest {
            order_id: OrderId::new(),
            customer_id: CustomerId::new(),
            amount: Money::from_cents(cents),
            payment_method: method.to_string(),
        }
    }

    #[tokio::test]
    async fn test_charge_and_refund() {
        let service = InMemoryPaymentService::new();
        let result = service.charge(&request("card", 5000)).await.unwrap();
        assert!(result.payment_id.starts_with("PAY-"));
        assert_eq!(service.payment_count(), 1);
        assert_eq!(service.captured_total(), Money::from_cents(5000));

        let refund = service.refund(&result.payment_id).await.unwrap();
        let again = service.refund(&result.payment_id).await.unwrap();
        assert_eq!(refund, again);
        assert_eq!(service.payment_count(), 0);
        assert_eq!(
            service.payment_status(&result.payment_id),
            Some(PaymentStatus::Refunded)
        );
    }

    #[tokio::test]
    async fn test_invalid_payment_method() {
        let service = InMemoryPaymentService::new();
        let err = service.charge(&request("iou", 100)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPaymentMethod(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let service = InMemoryPaymentService::new();
        assert!(matches!(
            service.charge(&request("card", 0)).await,
            Err(ServiceError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_on_charge() {
        let service = InMemoryPaymentService::new();
        service.set_fail_on_charge(true);
        assert!(service.charge(&request("card", 100)).await.is_err());
        assert_eq!(service.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_refund_unknown_payment() {
        let service = InMemoryPaymentService::new();
        assert!(matches!(
            service.refund("PAY-0042").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
