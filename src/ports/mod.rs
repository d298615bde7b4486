//! Trait seams between the payment engine and its backing infrastructure.
//! Production wires Postgres/Redis/Kashier; tests wire the in-memory
//! adapters and a scripted gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::PaymentTransaction;
use crate::gateway::{OrderRequest, OrderSnapshot};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("idempotency key already exists: {0}")]
    DuplicateKey(String),

    #[error("storage error: {0}")]
    Backend(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable store for payment transactions and their transition logs.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Persist a new transaction. A uniqueness violation on the idempotency
    /// key surfaces as [`RepositoryError::DuplicateKey`] so the caller can
    /// re-read the row the concurrent winner created.
    async fn insert(&self, payment: &PaymentTransaction) -> RepositoryResult<()>;

    /// Persist the current state of an existing transaction, including any
    /// transition log entries appended since the last save.
    async fn update(&self, payment: &PaymentTransaction) -> RepositoryResult<()>;

    async fn get(&self, id: Uuid) -> RepositoryResult<PaymentTransaction>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> RepositoryResult<Option<PaymentTransaction>>;

    async fn find_by_gateway_order_id(
        &self,
        order_id: &str,
    ) -> RepositoryResult<Option<PaymentTransaction>>;

    /// Transactions in a reconcilable status whose `next_reconciliation_at`
    /// is due, ordered by due time.
    async fn due_for_reconciliation(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<PaymentTransaction>>;

    /// Transactions still in `created` older than `cutoff`, i.e. never
    /// submitted to the gateway. These are the retry sweep's candidates.
    async fn stale_created(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<PaymentTransaction>>;
}

/// Opaque ownership proof returned by [`PaymentLock::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// Process-external mutual exclusion keyed by payment id, with TTL auto
/// expiry so a crashed holder cannot wedge a payment forever.
///
/// Acquisition never blocks: contention means "processing elsewhere" and the
/// caller backs off.
#[async_trait]
pub trait PaymentLock: Send + Sync {
    async fn try_acquire(
        &self,
        payment_id: Uuid,
        ttl: Duration,
    ) -> anyhow::Result<Option<LockToken>>;

    /// Release only succeeds for the holder's own token; a stale token after
    /// TTL expiry is a silent no-op.
    async fn release(&self, payment_id: Uuid, token: &LockToken) -> anyhow::Result<()>;
}

/// Stateless adapter to the external payment processor. Implementations must
/// classify every outcome, including network failures, into the four
/// [`crate::gateway::GatewayStatus`] categories; nothing else about the
/// provider leaks past this boundary.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> OrderSnapshot;

    async fn query_order_status(&self, order_id: &str) -> OrderSnapshot;
}

/// Downstream collaborator notified when a payment reaches a terminal state.
/// Receipts, customer messaging and trip bookkeeping hang off this; none of
/// it belongs in the state machine.
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn payment_completed(&self, payment: &PaymentTransaction);

    async fn payment_failed(&self, payment: &PaymentTransaction);
}
