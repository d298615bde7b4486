#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use fareflow::adapters::memory::{InMemoryPaymentLock, InMemoryPaymentRepository};
use fareflow::config::PaymentConfig;
use fareflow::gateway::{GatewayStatus, OrderRequest, OrderSnapshot};
use fareflow::ports::PaymentGateway;
use fareflow::services::{LogNotifier, PaymentService, ReconciliationService};

/// Scripted gateway: responses are queued up front and consumed in order.
/// An empty queue answers `Unknown`, which is what a real outage looks like.
#[derive(Default)]
pub struct MockGateway {
    create_responses: Mutex<VecDeque<OrderSnapshot>>,
    query_responses: Mutex<VecDeque<OrderSnapshot>>,
    create_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn push_create(&self, snapshot: OrderSnapshot) {
        self.create_responses.lock().await.push_back(snapshot);
    }

    pub async fn push_query(&self, snapshot: OrderSnapshot) {
        self.query_responses.lock().await.push_back(snapshot);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(&self, _request: &OrderRequest) -> OrderSnapshot {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.create_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| OrderSnapshot::unknown("no scripted response"))
    }

    async fn query_order_status(&self, _order_id: &str) -> OrderSnapshot {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.query_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| OrderSnapshot::unknown("no scripted response"))
    }
}

pub fn snapshot(status: GatewayStatus, order_id: &str) -> OrderSnapshot {
    OrderSnapshot {
        status,
        order_id: Some(order_id.to_string()),
        transaction_id: Some(format!("txn-{order_id}")),
        detail: None,
    }
}

pub struct TestEngine {
    pub repo: Arc<InMemoryPaymentRepository>,
    pub lock: Arc<InMemoryPaymentLock>,
    pub gateway: Arc<MockGateway>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
}

pub fn test_config() -> PaymentConfig {
    PaymentConfig {
        // Small bounds and no delay so tests exercise the edges directly.
        reconciliation_max_attempts: 3,
        reconciliation_initial_delay_secs: 0,
        retry_max_attempts: 2,
        retry_age_threshold_secs: 60,
        ..PaymentConfig::default()
    }
}

pub fn engine() -> TestEngine {
    engine_with_config(test_config())
}

pub fn engine_with_config(config: PaymentConfig) -> TestEngine {
    let repo = Arc::new(InMemoryPaymentRepository::new());
    let lock = Arc::new(InMemoryPaymentLock::new());
    let gateway = MockGateway::new();

    let payments = Arc::new(PaymentService::new(
        repo.clone(),
        gateway.clone(),
        lock.clone(),
        Arc::new(LogNotifier),
        config.clone(),
        "EGP".to_string(),
    ));
    let reconciliation = Arc::new(ReconciliationService::new(
        repo.clone(),
        gateway.clone(),
        lock.clone(),
        Arc::new(LogNotifier),
        config,
    ));

    TestEngine {
        repo,
        lock,
        gateway,
        payments,
        reconciliation,
    }
}
