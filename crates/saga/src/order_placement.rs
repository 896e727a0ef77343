//! Order placement saga.
//!
//! Validates the customer, holds stock, takes the payment, records the
//! order and finally sends a confirmation. A failure after stock was held
//! or money was taken is undone by the orchestrator in reverse order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CustomerId, Money, OrderId};
use resilience::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use services::{
    ChargeRequest, InventoryService, Notification, NotificationService, OrderLine, OrderRecord,
    OrderRepository, OrderStatus, PaymentResult, PaymentService, ReservationItem,
    ReservationResult, UserDirectory, UserProfile,
};

use crate::context::SagaContext;
use crate::error::SagaError;
use crate::orchestrator::{SagaOrchestrator, SagaResult};
use crate::step::SagaStep;

/// The saga type identifier for order placement.
pub const SAGA_TYPE: &str = "OrderPlacement";

/// Step name: Check that the customer exists and is active.
pub const STEP_VALIDATE_CUSTOMER: &str = "validate_customer";

/// Step name: Reserve inventory for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Process payment for the order.
pub const STEP_PROCESS_PAYMENT: &str = "process_payment";

/// Step name: Persist the order record.
pub const STEP_CREATE_ORDER: &str = "create_order";

/// Step name: Notify the customer.
pub const STEP_SEND_CONFIRMATION: &str = "send_confirmation";

/// A request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    pub payment_method: String,
}

impl PlaceOrder {
    /// Creates a request with a fresh order ID.
    pub fn new(
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            customer_id,
            lines,
            payment_method: payment_method.into(),
        }
    }

    /// Returns the sum of all line totals.
    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::line_total).sum()
    }

    /// Rejects requests that can never succeed.
    pub fn validate(&self) -> Result<(), SagaError> {
        if self.lines.is_empty() {
            return Err(SagaError::InvalidRequest("order has no lines".into()));
        }
        if let Some(line) = self.lines.iter().find(|l| l.quantity == 0) {
            return Err(SagaError::InvalidRequest(format!(
                "line for {} has zero quantity",
                line.product_id
            )));
        }
        if !self.total().is_positive() {
            return Err(SagaError::InvalidRequest(
                "order total must be positive".into(),
            ));
        }
        Ok(())
    }

    fn reservation_items(&self) -> Vec<ReservationItem> {
        self.lines.iter().map(ReservationItem::from).collect()
    }
}

/// The services the order placement saga calls.
#[derive(Clone)]
pub struct OrderPlacementServices {
    pub users: Arc<dyn UserDirectory>,
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub orders: Arc<dyn OrderRepository>,
    pub notifications: Arc<dyn NotificationService>,
}

/// Builds and runs order placement sagas.
pub struct OrderPlacementSaga {
    orchestrator: Arc<SagaOrchestrator>,
    services: OrderPlacementServices,
}

impl OrderPlacementSaga {
    /// Creates a new order placement saga runner.
    pub fn new(orchestrator: Arc<SagaOrchestrator>, services: OrderPlacementServices) -> Self {
        Self {
            orchestrator,
            services,
        }
    }

    /// Returns the orchestrator, for loading saga state.
    pub fn orchestrator(&self) -> &Arc<SagaOrchestrator> {
        &self.orchestrator
    }

    /// Builds the step list for one request.
    pub fn steps(&self, request: &PlaceOrder) -> Vec<Arc<dyn SagaStep>> {
        let request = Arc::new(request.clone());
        let services = &self.services;
        vec![
            Arc::new(ValidateCustomer {
                users: Arc::clone(&services.users),
                request: Arc::clone(&request),
            }),
            Arc::new(ReserveInventory {
                inventory: Arc::clone(&services.inventory),
                request: Arc::clone(&request),
            }),
            Arc::new(ProcessPayment {
                payment: Arc::clone(&services.payment),
                request: Arc::clone(&request),
            }),
            Arc::new(CreateOrder {
                orders: Arc::clone(&services.orders),
                request: Arc::clone(&request),
            }),
            Arc::new(SendConfirmation {
                notifications: Arc::clone(&services.notifications),
                request,
            }),
        ]
    }

    /// Validates the request and runs the saga to completion.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, customer_id = %request.customer_id))]
    pub async fn place_order(&self, request: PlaceOrder) -> Result<SagaResult, SagaError> {
        request.validate()?;
        let steps = self.steps(&request);
        let context = SagaContext::new(
            SAGA_TYPE,
            request.order_id.to_string(),
            serde_json::to_value(&request)?,
        );
        self.orchestrator.run(&steps, context).await
    }
}

struct ValidateCustomer {
    users: Arc<dyn UserDirectory>,
    request: Arc<PlaceOrder>,
}

#[async_trait]
impl SagaStep for ValidateCustomer {
    fn name(&self) -> &str {
        STEP_VALIDATE_CUSTOMER
    }

    fn service(&self) -> Option<&str> {
        Some(services::USERS)
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, _ctx: &SagaContext) -> Result<Value, ServiceError> {
        let profile = self.users.get_user(self.request.customer_id).await?;
        if !profile.active {
            return Err(ServiceError::status(
                403,
                format!("customer {} is inactive", profile.customer_id),
            ));
        }
        Ok(serde_json::to_value(profile)?)
    }
}

struct ReserveInventory {
    inventory: Arc<dyn InventoryService>,
    request: Arc<PlaceOrder>,
}

#[async_trait]
impl SagaStep for ReserveInventory {
    fn name(&self) -> &str {
        STEP_RESERVE_INVENTORY
    }

    fn service(&self) -> Option<&str> {
        Some(services::INVENTORY)
    }

    async fn execute(&self, _ctx: &SagaContext) -> Result<Value, ServiceError> {
        let reservation = self
            .inventory
            .reserve(self.request.order_id, &self.request.reservation_items())
            .await?;
        Ok(serde_json::to_value(reservation)?)
    }

    async fn compensate(&self, _ctx: &SagaContext, result: &Value) -> Result<(), ServiceError> {
        let reservation: ReservationResult = serde_json::from_value(result.clone())?;
        self.inventory.release(&reservation.reservation_id).await
    }
}

struct ProcessPayment {
    payment: Arc<dyn PaymentService>,
    request: Arc<PlaceOrder>,
}

#[async_trait]
impl SagaStep for ProcessPayment {
    fn name(&self) -> &str {
        STEP_PROCESS_PAYMENT
    }

    fn service(&self) -> Option<&str> {
        Some(services::PAYMENT)
    }

    async fn execute(&self, _ctx: &SagaContext) -> Result<Value, ServiceError> {
        let charge = ChargeRequest {
            order_id: self.request.order_id,
            customer_id: self.request.customer_id,
            amount: self.request.total(),
            payment_method: self.request.payment_method.clone(),
        };
        let payment = self.payment.charge(&charge).await?;
        Ok(serde_json::to_value(payment)?)
    }

    async fn compensate(&self, _ctx: &SagaContext, result: &Value) -> Result<(), ServiceError> {
        let payment: PaymentResult = serde_json::from_value(result.clone())?;
        let refund = self.payment.refund(&payment.payment_id).await?;
        tracing::info!(payment_id = %payment.payment_id, refund_id = %refund.refund_id, "payment refunded");
        Ok(())
    }
}

struct CreateOrder {
    orders: Arc<dyn OrderRepository>,
    request: Arc<PlaceOrder>,
}

#[async_trait]
impl SagaStep for CreateOrder {
    fn name(&self) -> &str {
        STEP_CREATE_ORDER
    }

    fn service(&self) -> Option<&str> {
        Some(services::ORDERS)
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, ctx: &SagaContext) -> Result<Value, ServiceError> {
        let reservation: ReservationResult = ctx.result_as(STEP_RESERVE_INVENTORY)?;
        let payment: PaymentResult = ctx.result_as(STEP_PROCESS_PAYMENT)?;

        let record = OrderRecord {
            order_id: self.request.order_id,
            customer_id: self.request.customer_id,
            lines: self.request.lines.clone(),
            total: self.request.total(),
            status: OrderStatus::Confirmed,
            reservation_id: Some(reservation.reservation_id),
            payment_id: Some(payment.payment_id),
            created_at: Utc::now(),
        };
        let stored = self.orders.create(record).await?;
        Ok(json!({ "order_id": stored.order_id, "status": stored.status }))
    }

    async fn compensate(&self, _ctx: &SagaContext, _result: &Value) -> Result<(), ServiceError> {
        self.orders
            .set_status(self.request.order_id, OrderStatus::Cancelled)
            .await?;
        Ok(())
    }
}

/// Sends the confirmation. A delivery failure must not undo a paid order,
/// so errors are logged and reported in the step result instead.
struct SendConfirmation {
    notifications: Arc<dyn NotificationService>,
    request: Arc<PlaceOrder>,
}

impl SendConfirmation {
    async fn send(&self, ctx: &SagaContext) -> Result<String, ServiceError> {
        let profile: UserProfile = ctx.result_as(STEP_VALIDATE_CUSTOMER)?;
        let notification = Notification {
            recipient: profile.email,
            template: "order_confirmed".to_string(),
            data: json!({
                "order_id": self.request.order_id,
                "total": self.request.total().to_string(),
            }),
        };
        let receipt = self.notifications.send(&notification).await?;
        Ok(receipt.notification_id)
    }
}

#[async_trait]
impl SagaStep for SendConfirmation {
    fn name(&self) -> &str {
        STEP_SEND_CONFIRMATION
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &SagaContext) -> Result<Value, ServiceError> {
        match self.send(ctx).await {
            Ok(notification_id) => Ok(json!({ "sent": true, "notification_id": notification_id })),
            Err(error) => {
                tracing::warn!(order_id = %self.request.order_id, %error, "confirmation not sent");
                metrics::counter!("notification_failures_total").increment(1);
                Ok(json!({ "sent": false, "error": error.to_string() }))
            }
        }
    }
}
