//! Integration tests for the order placement saga.

use std::sync::Arc;
use std::time::Duration;

use common::{InMemoryStateStore, Money, RecordingEventSink, SagaId};
use resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ResilientCallExecutor,
    RetryPolicy, ServiceError,
};
use saga::{
    OrderPlacementSaga, OrderPlacementServices, PlaceOrder, SagaContext, SagaEvent,
    SagaOrchestrator, SagaStatus,
};
use services::{
    InMemoryInventoryService, InMemoryNotificationService, InMemoryOrderRepository,
    InMemoryPaymentService, InMemoryUserDirectory, OrderLine, OrderStatus,
};

struct TestHarness {
    saga: OrderPlacementSaga,
    breakers: Arc<CircuitBreakerRegistry>,
    store: InMemoryStateStore<SagaId, SagaContext>,
    sink: RecordingEventSink<SagaEvent>,
    users: InMemoryUserDirectory,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    orders: InMemoryOrderRepository,
}

impl TestHarness {
    fn new() -> Self {
        let users = InMemoryUserDirectory::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();
        let orders = InMemoryOrderRepository::new();
        let notifications = InMemoryNotificationService::new();

        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            ..Default::default()
        }));
        let store = InMemoryStateStore::new();
        let sink = RecordingEventSink::new();

        let orchestrator = SagaOrchestrator::new(
            ResilientCallExecutor::new(Arc::clone(&breakers)),
            RetryPolicy::exponential(3, Duration::from_millis(50)),
        )
        .with_store(Arc::new(store.clone()))
        .with_sink(Arc::new(sink.clone()));

        let saga = OrderPlacementSaga::new(
            Arc::new(orchestrator),
            OrderPlacementServices {
                users: Arc::new(users.clone()),
                inventory: Arc::new(inventory.clone()),
                payment: Arc::new(payment.clone()),
                orders: Arc::new(orders.clone()),
                notifications: Arc::new(notifications),
            },
        );

        Self {
            saga,
            breakers,
            store,
            sink,
            users,
            inventory,
            payment,
            orders,
        }
    }

    fn request(&self) -> PlaceOrder {
        let customer_id = self.users.add_active("Grace", "grace@example.com");
        PlaceOrder::new(
            customer_id,
            vec![OrderLine::new("SKU-001", 2, Money::from_cents(2500))],
            "card",
        )
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_full_order_placement() {
    let h = TestHarness::new();
    let request = h.request();
    let order_id = request.order_id;

    let result = h.saga.place_order(request).await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, SagaStatus::Completed);
    assert_eq!(
        result.executed_steps,
        vec![
            "validate_customer",
            "reserve_inventory",
            "process_payment",
            "create_order",
            "send_confirmation"
        ]
    );
    assert_eq!(
        h.orders.snapshot(order_id).unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(h.payment.captured_total(), Money::from_cents(5000));
}

#[tokio::test(start_paused = true)]
async fn test_inventory_failure_no_compensation_needed() {
    let h = TestHarness::new();
    h.inventory.set_fail_on_reserve(true);

    let result = h.saga.place_order(h.request()).await.unwrap();

    assert!(!result.success);
    assert!(result.compensation_executed);
    assert_eq!(result.status, SagaStatus::Compensated);
    assert_eq!(result.executed_steps, vec!["validate_customer"]);
    assert_eq!(h.payment.payment_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_order_store_failure_refunds_payment_releases_inventory() {
    let h = TestHarness::new();
    h.orders
        .faults()
        .fail_always("create", ServiceError::status(503, "unavailable"));

    let result = h.saga.place_order(h.request()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status, SagaStatus::Compensated);
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(h.payment.payment_count(), 0);

    let types = h.sink.event_types();
    let compensation: Vec<_> = types
        .iter()
        .skip_while(|t| **t != "CompensationStarted")
        .copied()
        .collect();
    assert_eq!(
        compensation,
        vec![
            "CompensationStarted",
            "CompensationStepCompleted",
            "CompensationStepCompleted",
            "CompensationStepCompleted",
            "SagaCompensated"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_refund_leaves_saga_failed() {
    let h = TestHarness::new();
    h.orders
        .faults()
        .fail_always("create", ServiceError::unavailable("db down"));
    h.payment
        .faults()
        .fail_always("refund", ServiceError::unavailable("gateway down"));

    let result = h.saga.place_order(h.request()).await.unwrap();

    assert!(!result.success);
    assert!(result.compensation_executed);
    assert_eq!(result.status, SagaStatus::Failed);
    assert_eq!(result.failed_compensations, vec!["process_payment"]);
    // inventory is still released after the refund failed
    assert_eq!(h.inventory.reservation_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_saga_state_can_be_loaded_from_store() {
    let h = TestHarness::new();
    let result = h.saga.place_order(h.request()).await.unwrap();

    let stored = h.saga.orchestrator().get_saga(result.saga_id).await.unwrap();
    assert_eq!(stored.status, SagaStatus::Completed);
    assert_eq!(stored.executed_steps.len(), 5);
    assert!(stored.result("process_payment").is_some());
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_multiple_independent_sagas() {
    let h = TestHarness::new();
    let first = h.request();
    let second = h.request();

    let (a, b) = tokio::join!(h.saga.place_order(first), h.saga.place_order(second));

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.success && b.success);
    assert_ne!(a.saga_id, b.saga_id);
    assert_eq!(h.inventory.reservation_count(), 2);
    assert_eq!(h.orders.count_with_status(OrderStatus::Confirmed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_one_saga_fails_other_succeeds() {
    let h = TestHarness::new();
    h.inventory.set_stock("SKU-001", 2);

    let first = h.saga.place_order(h.request()).await.unwrap();
    let second = h.saga.place_order(h.request()).await.unwrap();

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(second.status, SagaStatus::Compensated);
    assert_eq!(h.payment.payment_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_fails_fast_across_sagas() {
    let h = TestHarness::new();
    h.payment
        .faults()
        .fail_always("charge", ServiceError::unavailable("gateway down"));

    let first = h.saga.place_order(h.request()).await.unwrap();
    assert!(!first.success);
    // the third failure opens the circuit and the fourth attempt is rejected
    assert_eq!(h.payment.faults().calls("charge"), 3);
    assert_eq!(h.breakers.get("payment").state(), CircuitState::Open);

    let second = h.saga.place_order(h.request()).await.unwrap();
    assert!(!second.success);
    assert!(second.error.unwrap().contains("is open"));
    assert_eq!(h.payment.faults().calls("charge"), 3);
    assert_eq!(h.inventory.reservation_count(), 0);
}
