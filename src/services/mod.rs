pub mod payment;
pub mod reconciliation;

pub use payment::{CreatePaymentRequest, PaymentService, WebhookOutcome};
pub use reconciliation::ReconciliationService;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{PaymentStatus, PaymentTransaction, TransitionError};
use crate::ports::{PaymentNotifier, RepositoryError};

#[derive(Error, Debug)]
pub enum PaymentError {
    /// Idempotency key reused with a different amount or currency.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment {0} not found")]
    NotFound(Uuid),

    /// Another worker holds the lock. Deferred, not failed.
    #[error("payment {0} is being processed elsewhere")]
    Locked(Uuid),

    /// Retry is only legal for payments that never reached the gateway;
    /// anything past `created` belongs to reconciliation.
    #[error("payment {id} in status {status} cannot be retried")]
    NotRetryable { id: Uuid, status: PaymentStatus },

    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("lock backend error: {0}")]
    LockBackend(String),
}

/// Notifier that only emits structured logs. The production deployment hangs
/// push notifications and trip bookkeeping off this port; the engine itself
/// does not care who listens.
pub struct LogNotifier;

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn payment_completed(&self, payment: &PaymentTransaction) {
        tracing::info!(
            payment_id = %payment.id,
            trip_reference = %payment.trip_reference,
            amount = %payment.amount,
            currency = %payment.currency,
            "payment confirmed"
        );
    }

    async fn payment_failed(&self, payment: &PaymentTransaction) {
        tracing::warn!(
            payment_id = %payment.id,
            trip_reference = %payment.trip_reference,
            amount = %payment.amount,
            "payment failed"
        );
    }
}
