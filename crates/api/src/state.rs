//! Shared application state.

use std::sync::Arc;

use resilience::{CircuitBreakerRegistry, ResilientCallExecutor};
use saga::{OrderPlacementSaga, OrderPlacementServices, SagaOrchestrator};
use services::{
    INVENTORY, InMemoryInventoryService, InMemoryNotificationService, InMemoryOrderRepository,
    InMemoryPaymentService, InMemoryUserDirectory, NOTIFICATION, ORDERS, PAYMENT, USERS,
};
use transaction::{OrderServices, TransactionCoordinator, standard_registry};

use crate::config::Config;

/// The in-memory downstream services the demo server runs against.
///
/// Handles are cheap clones sharing state, so tests can seed data and
/// inject faults through the same instances the workflows call.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServices {
    pub users: InMemoryUserDirectory,
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub orders: InMemoryOrderRepository,
    pub notifications: InMemoryNotificationService,
}

impl InMemoryServices {
    fn placement(&self) -> OrderPlacementServices {
        OrderPlacementServices {
            users: Arc::new(self.users.clone()),
            inventory: Arc::new(self.inventory.clone()),
            payment: Arc::new(self.payment.clone()),
            orders: Arc::new(self.orders.clone()),
            notifications: Arc::new(self.notifications.clone()),
        }
    }

    fn operations(&self) -> OrderServices {
        OrderServices {
            inventory: Arc::new(self.inventory.clone()),
            payment: Arc::new(self.payment.clone()),
            orders: Arc::new(self.orders.clone()),
            notifications: Arc::new(self.notifications.clone()),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub config: Config,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub placement: OrderPlacementSaga,
    pub coordinator: Arc<TransactionCoordinator>,
    pub services: InMemoryServices,
}

/// Wires the saga runner and the transaction coordinator over one shared
/// breaker registry and a fresh set of in-memory services.
pub fn create_default_state(config: Config) -> Arc<AppState> {
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()));
    // Created up front so every dependency shows up in the breaker listing.
    for name in [USERS, INVENTORY, PAYMENT, ORDERS, NOTIFICATION] {
        breakers.get(name);
    }

    let services = InMemoryServices::default();
    let executor = ResilientCallExecutor::new(Arc::clone(&breakers));

    let orchestrator = Arc::new(SagaOrchestrator::new(
        executor.clone(),
        config.retry_policy(),
    ));
    let placement = OrderPlacementSaga::new(orchestrator, services.placement());

    let coordinator = Arc::new(TransactionCoordinator::new(
        Arc::new(standard_registry(&services.operations())),
        executor,
        config.coordinator_config(),
    ));

    Arc::new(AppState {
        config,
        breakers,
        placement,
        coordinator,
        services,
    })
}
