//! Resolves transactions whose gateway outcome was never confirmed, by
//! actively querying the gateway under the same lock and transition rules as
//! the webhook path. Whichever side resolves a payment first wins; the other
//! becomes a no-op.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::domain::PaymentStatus;
use crate::gateway::{GatewayStatus, OrderSnapshot};
use crate::ports::{PaymentGateway, PaymentLock, PaymentNotifier, PaymentRepository};
use crate::services::PaymentError;

#[derive(Clone)]
pub struct ReconciliationService {
    repo: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    lock: Arc<dyn PaymentLock>,
    notifier: Arc<dyn PaymentNotifier>,
    config: PaymentConfig,
}

impl ReconciliationService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        lock: Arc<dyn PaymentLock>,
        notifier: Arc<dyn PaymentNotifier>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            repo,
            gateway,
            lock,
            notifier,
            config,
        }
    }

    /// Reconcile a single payment. Lock contention and already-resolved
    /// payments are quiet no-ops; the scheduler simply revisits later.
    pub async fn reconcile(&self, payment_id: Uuid) -> Result<(), PaymentError> {
        let ttl = Duration::from_secs(self.config.webhook_lock_ttl_secs);
        let Some(token) = self
            .lock
            .try_acquire(payment_id, ttl)
            .await
            .map_err(|e| PaymentError::LockBackend(e.to_string()))?
        else {
            tracing::debug!(payment_id = %payment_id, "payment locked, skipping reconciliation");
            return Ok(());
        };

        let result = self.reconcile_locked(payment_id).await;

        if let Err(e) = self.lock.release(payment_id, &token).await {
            tracing::warn!(payment_id = %payment_id, error = %e, "failed to release reconciliation lock");
        }

        result
    }

    async fn reconcile_locked(&self, payment_id: Uuid) -> Result<(), PaymentError> {
        let mut payment = self.repo.get(payment_id).await?;

        if payment.is_final() {
            // Typically the webhook got here first.
            tracing::debug!(
                payment_id = %payment.id,
                status = %payment.status,
                webhook_received = payment.webhook_received,
                "payment already resolved, nothing to reconcile"
            );
            if payment.next_reconciliation_at.is_some() {
                payment.cancel_reconciliation();
                self.repo.update(&payment).await?;
            }
            return Ok(());
        }

        if payment.reconciliation_attempts >= self.config.reconciliation_max_attempts {
            // The one place "we don't know" becomes a business decision.
            // Loud on purpose: money may be sitting at the gateway.
            tracing::error!(
                payment_id = %payment.id,
                attempts = payment.reconciliation_attempts,
                gateway_order_id = payment.gateway_order_id.as_deref().unwrap_or("none"),
                "max reconciliation attempts reached, forcing payment to failed"
            );
            payment.transition_to(PaymentStatus::Failed, "max_reconciliation_attempts")?;
            payment.cancel_reconciliation();
            self.repo.update(&payment).await?;
            self.notifier.payment_failed(&payment).await;
            return Ok(());
        }

        tracing::info!(
            payment_id = %payment.id,
            status = %payment.status,
            attempt = payment.reconciliation_attempts + 1,
            "reconciling payment against gateway"
        );

        let snapshot = match payment.gateway_order_id.as_deref() {
            Some(order_id) => self.gateway.query_order_status(order_id).await,
            // Order creation itself was ambiguous; nothing to query yet.
            None => OrderSnapshot::unknown("no gateway order id recorded"),
        };

        match snapshot.status {
            GatewayStatus::Success => {
                if payment.gateway_transaction_id.is_none() {
                    payment.gateway_transaction_id = snapshot.transaction_id.clone();
                }
                payment.transition_to(PaymentStatus::Paid, "reconciliation")?;
                payment.cancel_reconciliation();
                payment.last_reconciliation_at = Some(Utc::now());
                self.repo.update(&payment).await?;
                self.notifier.payment_completed(&payment).await;
            }
            GatewayStatus::Failed => {
                payment.transition_to(PaymentStatus::Failed, "reconciliation")?;
                payment.cancel_reconciliation();
                payment.last_reconciliation_at = Some(Utc::now());
                self.repo.update(&payment).await?;
                self.notifier.payment_failed(&payment).await;
            }
            GatewayStatus::Pending => {
                if payment.status.can_transition_to(PaymentStatus::Processing) {
                    payment.transition_to(PaymentStatus::Processing, "reconciliation")?;
                }
                payment.schedule_reconciliation(
                    self.config.reconciliation_initial_delay_secs,
                    self.config.reconciliation_max_delay_secs,
                );
                self.repo.update(&payment).await?;
            }
            GatewayStatus::Unknown => {
                tracing::debug!(
                    payment_id = %payment.id,
                    detail = snapshot.detail.as_deref().unwrap_or("none"),
                    "gateway status still ambiguous, backing off"
                );
                payment.schedule_reconciliation(
                    self.config.reconciliation_initial_delay_secs,
                    self.config.reconciliation_max_delay_secs,
                );
                self.repo.update(&payment).await?;
            }
        }

        Ok(())
    }

    /// Reconcile every payment whose `next_reconciliation_at` is due.
    /// Per-payment failures are logged and skipped, never abort the batch.
    pub async fn reconcile_due(&self, now: DateTime<Utc>) -> Result<usize, PaymentError> {
        let due = self
            .repo
            .due_for_reconciliation(now, self.config.reconciliation_batch_size)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = due.len(), "starting reconciliation sweep");

        let mut reconciled = 0;
        for payment in due {
            match self.reconcile(payment.id).await {
                Ok(()) => reconciled += 1,
                Err(e) => {
                    tracing::error!(payment_id = %payment.id, error = %e, "reconciliation sweep error");
                }
            }
        }
        Ok(reconciled)
    }
}
