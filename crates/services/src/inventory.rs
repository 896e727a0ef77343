//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use parking_lot::RwLock;
use resilience::ServiceError;
use serde::{Deserialize, Serialize};

use crate::fault::FaultInjector;

/// An item to hold in inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ReservationItem {
    /// Creates a reservation item.
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: ProductId::new(product_id),
            quantity,
        }
    }
}

/// Result of a successful inventory reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationResult {
    /// The reservation ID assigned by the inventory service.
    pub reservation_id: String,
}

/// Lifecycle of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Released,
}

/// Trait for inventory management operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Holds stock for the given order items.
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[ReservationItem],
    ) -> Result<ReservationResult, ServiceError>;

    /// Returns held stock to the shelf. Releasing twice is a no-op.
    async fn release(&self, reservation_id: &str) -> Result<(), ServiceError>;

    /// Holds the stock of a released reservation again.
    async fn reinstate(&self, reservation_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug)]
struct Reservation {
    items: Vec<ReservationItem>,
    status: ReservationStatus,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    /// Products without an entry have unlimited stock.
    stock: HashMap<ProductId, u32>,
    reservations: HashMap<String, Reservation>,
    next_id: u32,
}

impl InMemoryInventoryState {
    fn check_and_take(&mut self, items: &[ReservationItem]) -> Result<(), ServiceError> {
        for item in items {
            if let Some(available) = self.stock.get(&item.product_id)
                && *available < item.quantity
            {
                return Err(ServiceError::InsufficientStock(format!(
                    "{}: requested {}, available {}",
                    item.product_id, item.quantity, available
                )));
            }
        }
        for item in items {
            if let Some(available) = self.stock.get_mut(&item.product_id) {
                *available -= item.quantity;
            }
        }
        Ok(())
    }

    fn put_back(&mut self, items: &[ReservationItem]) {
        for item in items {
            if let Some(available) = self.stock.get_mut(&item.product_id) {
                *available += item.quantity;
            }
        }
    }
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault injector for scripting failures.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Configures every reserve call to fail with insufficient stock.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        if fail {
            self.faults
                .fail_always("reserve", ServiceError::InsufficientStock("forced".into()));
        } else {
            self.faults.clear("reserve");
        }
    }

    /// Sets the tracked stock level of a product.
    pub fn set_stock(&self, product_id: impl Into<String>, quantity: u32) {
        self.state
            .write()
            .stock
            .insert(ProductId::new(product_id), quantity);
    }

    /// Returns the tracked stock level of a product.
    pub fn available(&self, product_id: &str) -> Option<u32> {
        self.state.read().stock.get(&ProductId::new(product_id)).copied()
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state
            .read()
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active)
            .count()
    }

    /// Returns the status of a reservation.
    pub fn reservation_status(&self, reservation_id: &str) -> Option<ReservationStatus> {
        self.state
            .read()
            .reservations
            .get(reservation_id)
            .map(|r| r.status)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        _order_id: OrderId,
        items: &[ReservationItem],
    ) -> Result<ReservationResult, ServiceError> {
        self.faults.enter("reserve").await?;
        let mut state = self.state.write();
        state.check_and_take(items)?;

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state.reservations.insert(
            reservation_id.clone(),
            Reservation {
                items: items.to_vec(),
                status: ReservationStatus::Active,
            },
        );

        Ok(ReservationResult { reservation_id })
    }

    async fn release(&self, reservation_id: &str) -> Result<(), ServiceError> {
        self.faults.enter("release").await?;
        let mut state = self.state.write();
        let items = match state.reservations.get_mut(reservation_id) {
            None => return Err(ServiceError::NotFound(format!("reservation {reservation_id}"))),
            Some(r) if r.status == ReservationStatus::Released => return Ok(()),
            Some(r) => {
                r.status = ReservationStatus::Released;
                r.items.clone()
            }
        };
        state.put_back(&items);
        Ok(())
    }

    async fn reinstate(&self, reservation_id: &str) -> Result<(), ServiceError> {
        self.faults.enter("reinstate").await?;
        let mut state = self.state.write();
        let items = match state.reservations.get(reservation_id) {
            None => return Err(ServiceError::NotFound(format!("reservation {reservation_id}"))),
            Some(r) if r.status == ReservationStatus::Active => return Ok(()),
            Some(r) => r.items.clone(),
        };
        state.check_and_take(&items)?;
        if let Some(r) = state.reservations.get_mut(reservation_id) {
            r.status = ReservationStatus::Active;
        }
        Ok(())
    }
}
