//! Contracts for the remote services an order touches, plus in-memory
//! implementations used by tests and the demo server.
//!
//! Every call returns a [`resilience::ServiceError`] on failure so the
//! orchestrators can classify and retry uniformly. The in-memory services
//! share a [`FaultInjector`] for scripted failures and call counting.

pub mod fault;
pub mod inventory;
pub mod notification;
pub mod orders;
pub mod payment;
pub mod users;

pub use fault::FaultInjector;
pub use inventory::{
    InMemoryInventoryService, InventoryService, ReservationItem, ReservationResult,
    ReservationStatus,
};
pub use notification::{
    InMemoryNotificationService, Notification, NotificationReceipt, NotificationService,
};
pub use orders::{InMemoryOrderRepository, OrderLine, OrderRecord, OrderRepository, OrderStatus};
pub use payment::{
    ChargeRequest, InMemoryPaymentService, PaymentResult, PaymentService, PaymentStatus,
    RefundResult,
};
pub use users::{InMemoryUserDirectory, UserDirectory, UserProfile};

/// Dependency name of the inventory service.
pub const INVENTORY: &str = "inventory";
/// Dependency name of the payment service.
pub const PAYMENT: &str = "payment";
/// Dependency name of the notification service.
pub const NOTIFICATION: &str = "notification";
/// Dependency name of the user directory.
pub const USERS: &str = "users";
/// Dependency name of the order record store.
pub const ORDERS: &str = "orders";
