//! Standard order operations and transaction builders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CustomerId, OrderId};
use resilience::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use services::{
    ChargeRequest, InventoryService, Notification, NotificationService, OrderLine, OrderRecord,
    OrderRepository, OrderStatus, PaymentResult, PaymentService, ReservationItem,
    ReservationResult,
};

use crate::registry::{OperationRegistry, ServiceOperation};
use crate::types::OperationRequest;

/// Transaction type of an order cancellation.
pub const ORDER_CANCELLATION: &str = "OrderCancellation";

/// Operation names registered by [`standard_registry`].
pub mod ops {
    pub const RESERVE: &str = "reserve";
    pub const RESTORE: &str = "restore";
    pub const CHARGE: &str = "charge";
    pub const CANCEL: &str = "cancel";
    pub const CREATE: &str = "create";
    pub const MARK_CANCELLED: &str = "mark_cancelled";
    pub const SEND: &str = "send";
}

/// The services the standard operations call.
#[derive(Clone)]
pub struct OrderServices {
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub orders: Arc<dyn OrderRepository>,
    pub notifications: Arc<dyn NotificationService>,
}

/// Builds the registry of order operations.
pub fn standard_registry(services: &OrderServices) -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    let inventory = &services.inventory;
    let payment = &services.payment;
    let orders = &services.orders;
    registry
        .register(
            services::INVENTORY,
            ops::RESERVE,
            Arc::new(ReserveInventory(Arc::clone(inventory))),
        )
        .register(
            services::INVENTORY,
            ops::RESTORE,
            Arc::new(RestoreInventory(Arc::clone(inventory))),
        )
        .register(
            services::PAYMENT,
            ops::CHARGE,
            Arc::new(ChargePayment(Arc::clone(payment))),
        )
        .register(
            services::PAYMENT,
            ops::CANCEL,
            Arc::new(CancelPayment(Arc::clone(payment))),
        )
        .register(
            services::ORDERS,
            ops::CREATE,
            Arc::new(CreateOrder(Arc::clone(orders))),
        )
        .register(
            services::ORDERS,
            ops::MARK_CANCELLED,
            Arc::new(MarkOrderCancelled(Arc::clone(orders))),
        )
        .register(
            services::NOTIFICATION,
            ops::SEND,
            Arc::new(SendNotification(Arc::clone(&services.notifications))),
        );
    registry
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, ServiceError> {
    Ok(serde_json::from_value(value.clone())?)
}

/// Payload of `inventory:reserve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservePayload {
    pub order_id: OrderId,
    pub items: Vec<ReservationItem>,
}

/// Payload of `inventory:restore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePayload {
    pub reservation_id: String,
}

/// Payload of `payment:cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPaymentPayload {
    pub payment_id: String,
}

/// Payload of `orders:create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderPayload {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
}

/// Payload of `orders:mark_cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkCancelledPayload {
    pub order_id: OrderId,
}

struct ReserveInventory(Arc<dyn InventoryService>);

#[async_trait]
impl ServiceOperation for ReserveInventory {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let payload: ReservePayload = decode(payload)?;
        let reservation = self.0.reserve(payload.order_id, &payload.items).await?;
        Ok(serde_json::to_value(reservation)?)
    }

    async fn rollback(&self, _payload: &Value, result: &Value) -> Result<(), ServiceError> {
        let reservation: ReservationResult = decode(result)?;
        self.0.release(&reservation.reservation_id).await
    }
}

struct RestoreInventory(Arc<dyn InventoryService>);

#[async_trait]
impl ServiceOperation for RestoreInventory {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let payload: RestorePayload = decode(payload)?;
        self.0.release(&payload.reservation_id).await?;
        Ok(json!({ "reservation_id": payload.reservation_id, "restored": true }))
    }

    async fn rollback(&self, payload: &Value, _result: &Value) -> Result<(), ServiceError> {
        let payload: RestorePayload = decode(payload)?;
        self.0.reinstate(&payload.reservation_id).await
    }
}

struct ChargePayment(Arc<dyn PaymentService>);

#[async_trait]
impl ServiceOperation for ChargePayment {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let request: ChargeRequest = decode(payload)?;
        let payment = self.0.charge(&request).await?;
        Ok(serde_json::to_value(payment)?)
    }

    async fn rollback(&self, _payload: &Value, result: &Value) -> Result<(), ServiceError> {
        let payment: PaymentResult = decode(result)?;
        self.0.refund(&payment.payment_id).await?;
        Ok(())
    }
}

struct CancelPayment(Arc<dyn PaymentService>);

#[async_trait]
impl ServiceOperation for CancelPayment {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let payload: CancelPaymentPayload = decode(payload)?;
        let refund = self.0.refund(&payload.payment_id).await?;
        Ok(serde_json::to_value(refund)?)
    }

    /// Refunds cannot be taken back.
    async fn rollback(&self, payload: &Value, _result: &Value) -> Result<(), ServiceError> {
        tracing::warn!(%payload, "refund cannot be reversed, leaving it in place");
        Ok(())
    }
}

struct CreateOrder(Arc<dyn OrderRepository>);

#[async_trait]
impl ServiceOperation for CreateOrder {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let payload: CreateOrderPayload = decode(payload)?;
        let record = OrderRecord {
            order_id: payload.order_id,
            customer_id: payload.customer_id,
            total: payload.lines.iter().map(OrderLine::line_total).sum(),
            lines: payload.lines,
            status: OrderStatus::Pending,
            reservation_id: payload.reservation_id,
            payment_id: payload.payment_id,
            created_at: Utc::now(),
        };
        let stored = self.0.create(record).await?;
        Ok(json!({ "order_id": stored.order_id, "status": stored.status }))
    }

    async fn rollback(&self, payload: &Value, _result: &Value) -> Result<(), ServiceError> {
        let payload: CreateOrderPayload = decode(payload)?;
        self.0
            .set_status(payload.order_id, OrderStatus::Cancelled)
            .await?;
        Ok(())
    }
}

struct MarkOrderCancelled(Arc<dyn OrderRepository>);

#[async_trait]
impl ServiceOperation for MarkOrderCancelled {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let payload: MarkCancelledPayload = decode(payload)?;
        let previous = self
            .0
            .set_status(payload.order_id, OrderStatus::Cancelled)
            .await?;
        Ok(json!({ "order_id": payload.order_id, "previous_status": previous }))
    }

    async fn rollback(&self, payload: &Value, result: &Value) -> Result<(), ServiceError> {
        let payload: MarkCancelledPayload = decode(payload)?;
        let previous: OrderStatus = decode(&result["previous_status"])?;
        self.0.set_status(payload.order_id, previous).await?;
        Ok(())
    }
}

struct SendNotification(Arc<dyn NotificationService>);

#[async_trait]
impl ServiceOperation for SendNotification {
    async fn execute(&self, payload: &Value, _key: &str) -> Result<Value, ServiceError> {
        let notification: Notification = decode(payload)?;
        let receipt = self.0.send(&notification).await?;
        Ok(serde_json::to_value(receipt)?)
    }

    async fn rollback(&self, _payload: &Value, _result: &Value) -> Result<(), ServiceError> {
        Ok(())
    }

    fn is_idempotent(&self) -> bool {
        false
    }
}

/// Builds the operations that cancel a placed order: refund the payment,
/// return the stock, then mark the order cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancellation {
    pub order_id: OrderId,
    pub payment_id: String,
    pub reservation_id: String,
}

impl OrderCancellation {
    /// Creates a cancellation for an order.
    pub fn new(
        order_id: OrderId,
        payment_id: impl Into<String>,
        reservation_id: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            payment_id: payment_id.into(),
            reservation_id: reservation_id.into(),
        }
    }

    /// Builds a cancellation from a stored order, if it has both a payment
    /// and a reservation.
    pub fn from_record(record: &OrderRecord) -> Option<Self> {
        Some(Self::new(
            record.order_id,
            record.payment_id.clone()?,
            record.reservation_id.clone()?,
        ))
    }

    /// Returns the operations in execution order.
    pub fn operations(&self) -> Vec<OperationRequest> {
        vec![
            OperationRequest::new(
                services::PAYMENT,
                ops::CANCEL,
                json!({ "payment_id": self.payment_id }),
            )
            .with_max_retries(3),
            OperationRequest::new(
                services::INVENTORY,
                ops::RESTORE,
                json!({ "reservation_id": self.reservation_id }),
            )
            .with_max_retries(2),
            OperationRequest::new(
                services::ORDERS,
                ops::MARK_CANCELLED,
                json!({ "order_id": self.order_id }),
            )
            .with_max_retries(2),
        ]
    }

    /// Metadata attached to the transaction.
    pub fn metadata(&self) -> Value {
        json!({ "order_id": self.order_id })
    }
}
