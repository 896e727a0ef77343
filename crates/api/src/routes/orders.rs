//! Order placement and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, Money, OrderId};
use saga::{PlaceOrder, SagaStatus};
use serde::{Deserialize, Serialize};
use services::{OrderLine, OrderRepository, OrderStatus};
use transaction::{ORDER_CANCELLATION, OrderCancellation, TransactionResult};

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: String,
    pub items: Vec<OrderItemRequest>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

fn default_payment_method() -> String {
    "card".to_string()
}

// -- Response types --

#[derive(Serialize)]
pub struct PlaceOrderResponse {
    pub order_id: String,
    pub saga_id: String,
    pub status: SagaStatus,
    pub success: bool,
    pub total_cents: i64,
    pub error: Option<String>,
    pub compensation_executed: bool,
    pub failed_compensations: Vec<String>,
}

// -- Handlers --

/// POST /orders: runs the order placement saga.
///
/// Answers 201 when the order was placed and 422 when the saga failed;
/// the body reports what was compensated either way.
#[tracing::instrument(skip(state, req), fields(customer_id = %req.customer_id))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), ApiError> {
    let customer_id: CustomerId = parse_id(&req.customer_id)?;
    let lines = req
        .items
        .iter()
        .map(|item| {
            OrderLine::new(
                item.product_id.as_str(),
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();
    let request = PlaceOrder::new(customer_id, lines, req.payment_method);
    let order_id = request.order_id;
    let total = request.total();

    let result = state.placement.place_order(request).await?;

    let status = if result.success {
        StatusCode::CREATED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((
        status,
        Json(PlaceOrderResponse {
            order_id: order_id.to_string(),
            saga_id: result.saga_id.to_string(),
            status: result.status,
            success: result.success,
            total_cents: total.cents(),
            error: result.error,
            compensation_executed: result.compensation_executed,
            failed_compensations: result.failed_compensations,
        }),
    ))
}

/// POST /orders/{id}/cancel: refunds, returns stock and marks the order
/// cancelled as one distributed transaction.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TransactionResult>), ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let record = state.services.orders.get(order_id).await?;
    if record.status == OrderStatus::Cancelled {
        return Err(ApiError::Conflict(format!("Order {id} is already cancelled")));
    }
    let cancellation = OrderCancellation::from_record(&record).ok_or_else(|| {
        ApiError::Conflict(format!("Order {id} has no payment or reservation to undo"))
    })?;

    let result = state
        .coordinator
        .execute_transaction(
            ORDER_CANCELLATION,
            cancellation.operations(),
            cancellation.metadata(),
            Some(state.config.transaction_timeout),
        )
        .await?;

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}
