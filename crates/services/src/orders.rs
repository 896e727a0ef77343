//! Order record store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId};
use parking_lot::RwLock;
use resilience::ServiceError;
use serde::{Deserialize, Serialize};

use crate::fault::FaultInjector;
use crate::inventory::ReservationItem;

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates an order line.
    pub fn new(product_id: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: ProductId::new(product_id),
            quantity,
            unit_price,
        }
    }

    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

impl From<&OrderLine> for ReservationItem {
    fn from(line: &OrderLine) -> Self {
        ReservationItem {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
        }
    }
}

/// Order lifecycle as stored by the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub status: OrderStatus,
    pub reservation_id: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// CRUD operations on order records.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order. Creating an existing ID returns the stored record.
    async fn create(&self, record: OrderRecord) -> Result<OrderRecord, ServiceError>;

    /// Loads an order.
    async fn get(&self, order_id: OrderId) -> Result<OrderRecord, ServiceError>;

    /// Changes an order's status and returns the previous one.
    async fn set_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderStatus, ServiceError>;
}

/// In-memory order repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, OrderRecord>>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryOrderRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault injector for scripting failures.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the number of stored orders in `status`.
    pub fn count_with_status(&self, status: OrderStatus) -> usize {
        self.orders
            .read()
            .values()
            .filter(|o| o.status == status)
            .count()
    }

    /// Returns a stored order without going through fault injection.
    pub fn snapshot(&self, order_id: OrderId) -> Option<OrderRecord> {
        self.orders.read().get(&order_id).cloned()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, record: OrderRecord) -> Result<OrderRecord, ServiceError> {
        self.faults.enter("create").await?;
        let mut orders = self.orders.write();
        Ok(orders.entry(record.order_id).or_insert(record).clone())
    }

    async fn get(&self, order_id: OrderId) -> Result<OrderRecord, ServiceError> {
        self.faults.enter("get").await?;
        self.orders
            .read()
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
    }

    async fn set_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderStatus, ServiceError> {
        self.faults.enter("set_status").await?;
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        Ok(std::mem::replace(&mut order.status, status))
    }
}
