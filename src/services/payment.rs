//! Payment orchestration: idempotent creation, lock-guarded submission to
//! the gateway, webhook application, and the pre-gateway retry path.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::domain::{PaymentStatus, PaymentTransaction};
use crate::gateway::{GatewayStatus, OrderRequest};
use crate::ports::{PaymentGateway, PaymentLock, PaymentNotifier, PaymentRepository, RepositoryError};
use crate::services::PaymentError;

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub trip_reference: String,
    pub payer_reference: String,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// What happened to a webhook delivery. All three are acknowledged with 2xx;
/// the distinction only matters for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied(PaymentStatus),
    /// Transaction already terminal, or the webhook carried nothing
    /// actionable. Webhooks replay; this is the normal idempotent path.
    Ignored,
    /// Lock contention; the gateway will redeliver.
    Busy,
}

#[derive(Clone)]
pub struct PaymentService {
    repo: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    lock: Arc<dyn PaymentLock>,
    notifier: Arc<dyn PaymentNotifier>,
    config: PaymentConfig,
    default_currency: String,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        lock: Arc<dyn PaymentLock>,
        notifier: Arc<dyn PaymentNotifier>,
        config: PaymentConfig,
        default_currency: String,
    ) -> Self {
        Self {
            repo,
            gateway,
            lock,
            notifier,
            config,
            default_currency,
        }
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<PaymentTransaction, PaymentError> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn find_by_gateway_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentTransaction>, PaymentError> {
        Ok(self.repo.find_by_gateway_order_id(order_id).await?)
    }

    /// Idempotent creation. The same key always yields the same transaction;
    /// the same key with a different amount or currency is a conflict and
    /// never mutates the existing record.
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentTransaction, PaymentError> {
        let currency = request
            .currency
            .unwrap_or_else(|| self.default_currency.clone());
        let key = request.idempotency_key.unwrap_or_else(|| {
            derive_idempotency_key(
                &request.trip_reference,
                &request.payer_reference,
                &request.amount,
                &currency,
            )
        });

        if let Some(existing) = self.repo.find_by_idempotency_key(&key).await? {
            tracing::info!(
                payment_id = %existing.id,
                idempotency_key = %key,
                status = %existing.status,
                "payment already exists for idempotency key"
            );
            return check_conflict(existing, &request.amount, &currency);
        }

        let payment = PaymentTransaction::new(
            request.trip_reference,
            request.payer_reference,
            request.amount.clone(),
            currency.clone(),
            key.clone(),
            request.metadata,
        );

        match self.repo.insert(&payment).await {
            Ok(()) => {
                tracing::info!(
                    payment_id = %payment.id,
                    idempotency_key = %key,
                    amount = %payment.amount,
                    "payment transaction created"
                );
                Ok(payment)
            }
            Err(RepositoryError::DuplicateKey(_)) => {
                // Concurrent creation: another caller won. Return their row.
                let existing = self
                    .repo
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or(PaymentError::NotFound(payment.id))?;
                check_conflict(existing, &request.amount, &currency)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Submit the charge to the gateway under the distributed lock. Lock
    /// contention fails fast with [`PaymentError::Locked`]; the lock is
    /// released on every exit path (a crashed holder is covered by TTL).
    pub async fn process_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<PaymentTransaction, PaymentError> {
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let token = self
            .lock
            .try_acquire(payment_id, ttl)
            .await
            .map_err(|e| PaymentError::LockBackend(e.to_string()))?
            .ok_or(PaymentError::Locked(payment_id))?;

        let result = self.process_locked(payment_id).await;

        if let Err(e) = self.lock.release(payment_id, &token).await {
            tracing::warn!(
                payment_id = %payment_id,
                error = %e,
                "failed to release payment lock; TTL will expire it"
            );
        }

        result
    }

    async fn process_locked(
        &self,
        payment_id: Uuid,
    ) -> Result<PaymentTransaction, PaymentError> {
        let mut payment = self.repo.get(payment_id).await?;

        if payment.is_final() {
            tracing::warn!(
                payment_id = %payment.id,
                status = %payment.status,
                "attempted to process payment in final state"
            );
            return Ok(payment);
        }
        if payment.status != PaymentStatus::Created {
            // Already submitted; resolving it is reconciliation's job.
            tracing::debug!(
                payment_id = %payment.id,
                status = %payment.status,
                "payment already submitted to gateway, skipping"
            );
            return Ok(payment);
        }

        payment.transition_to(PaymentStatus::PendingGateway, "gateway_request_sent")?;
        payment.gateway_sent_at = Some(Utc::now());
        // Durable before the network call: if we crash mid-request the
        // sweep sees pending_gateway, not created, and will reconcile
        // instead of re-charging.
        self.repo.update(&payment).await?;

        let request = OrderRequest {
            merchant_order_id: payment.id,
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            payer_reference: payment.payer_reference.clone(),
            description: format!("Trip payment for {}", payment.trip_reference),
        };
        let snapshot = self.gateway.create_order(&request).await;

        payment.gateway_responded_at = Some(Utc::now());
        if payment.gateway_order_id.is_none() {
            payment.gateway_order_id = snapshot.order_id.clone();
        }
        if payment.gateway_transaction_id.is_none() {
            payment.gateway_transaction_id = snapshot.transaction_id.clone();
        }

        match snapshot.status {
            GatewayStatus::Success => {
                payment.transition_to(PaymentStatus::Paid, "gateway_response")?;
                payment.cancel_reconciliation();
                self.repo.update(&payment).await?;
                self.notifier.payment_completed(&payment).await;
            }
            GatewayStatus::Failed => {
                payment.transition_to(PaymentStatus::Failed, "gateway_response")?;
                payment.cancel_reconciliation();
                self.repo.update(&payment).await?;
                self.notifier.payment_failed(&payment).await;
            }
            GatewayStatus::Pending => {
                payment.transition_to(PaymentStatus::Processing, "gateway_response")?;
                payment.schedule_reconciliation(
                    self.config.reconciliation_initial_delay_secs,
                    self.config.reconciliation_max_delay_secs,
                );
                self.repo.update(&payment).await?;
            }
            GatewayStatus::Unknown => {
                tracing::warn!(
                    payment_id = %payment.id,
                    detail = snapshot.detail.as_deref().unwrap_or("none"),
                    "ambiguous gateway outcome, scheduling reconciliation"
                );
                payment.transition_to(PaymentStatus::Unknown, "gateway_error")?;
                payment.schedule_reconciliation(
                    self.config.reconciliation_initial_delay_secs,
                    self.config.reconciliation_max_delay_secs,
                );
                self.repo.update(&payment).await?;
            }
        }

        Ok(payment)
    }

    /// Re-attempt a payment that never reached the gateway. Anything past
    /// `created` is refused outright: resubmitting a possibly-submitted
    /// charge is how duplicate charges happen.
    pub async fn retry_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<PaymentTransaction, PaymentError> {
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let token = self
            .lock
            .try_acquire(payment_id, ttl)
            .await
            .map_err(|e| PaymentError::LockBackend(e.to_string()))?
            .ok_or(PaymentError::Locked(payment_id))?;

        let result = self.retry_locked(payment_id).await;

        if let Err(e) = self.lock.release(payment_id, &token).await {
            tracing::warn!(
                payment_id = %payment_id,
                error = %e,
                "failed to release payment lock; TTL will expire it"
            );
        }

        result
    }

    async fn retry_locked(&self, payment_id: Uuid) -> Result<PaymentTransaction, PaymentError> {
        let mut payment = self.repo.get(payment_id).await?;

        if payment.status != PaymentStatus::Created {
            return Err(PaymentError::NotRetryable {
                id: payment_id,
                status: payment.status,
            });
        }

        if payment.retry_count >= self.config.retry_max_attempts {
            tracing::error!(
                payment_id = %payment.id,
                retry_count = payment.retry_count,
                "max retry attempts exceeded, failing payment that never reached the gateway"
            );
            payment.transition_to(PaymentStatus::Failed, "max_retries_exceeded")?;
            self.repo.update(&payment).await?;
            self.notifier.payment_failed(&payment).await;
            return Ok(payment);
        }

        // Counted under the lock: concurrent sweeps contend on the lock
        // instead of both burning an attempt.
        payment.retry_count += 1;
        payment.last_retry_at = Some(Utc::now());
        self.repo.update(&payment).await?;

        self.process_locked(payment_id).await
    }

    /// Sweep payments stuck in `created` past the age threshold and push
    /// them through the retry path. Invoked by the retry scheduler.
    pub async fn retry_stale(&self, now: DateTime<Utc>) -> Result<usize, PaymentError> {
        let cutoff = now - chrono::Duration::seconds(self.config.retry_age_threshold_secs);
        let stale = self
            .repo
            .stale_created(cutoff, self.config.reconciliation_batch_size)
            .await?;

        let mut retried = 0;
        for payment in stale {
            match self.retry_payment(payment.id).await {
                Ok(_) => retried += 1,
                Err(PaymentError::Locked(id)) => {
                    tracing::debug!(payment_id = %id, "payment busy, retry sweep will revisit");
                }
                Err(PaymentError::NotRetryable { .. }) => {}
                Err(e) => {
                    tracing::error!(payment_id = %payment.id, error = %e, "retry sweep error");
                }
            }
        }
        Ok(retried)
    }

    /// Apply a verified webhook outcome. Signature verification happens at
    /// the HTTP boundary; by the time we are here the payload is trusted.
    pub async fn apply_webhook(
        &self,
        payment_id: Uuid,
        status: GatewayStatus,
        gateway_order_id: Option<String>,
        gateway_transaction_id: Option<String>,
        payload: serde_json::Value,
    ) -> Result<WebhookOutcome, PaymentError> {
        let ttl = Duration::from_secs(self.config.webhook_lock_ttl_secs);
        let Some(token) = self
            .lock
            .try_acquire(payment_id, ttl)
            .await
            .map_err(|e| PaymentError::LockBackend(e.to_string()))?
        else {
            tracing::warn!(payment_id = %payment_id, "webhook hit a locked payment, gateway will redeliver");
            return Ok(WebhookOutcome::Busy);
        };

        let result = self
            .apply_webhook_locked(payment_id, status, gateway_order_id, gateway_transaction_id, payload)
            .await;

        if let Err(e) = self.lock.release(payment_id, &token).await {
            tracing::warn!(payment_id = %payment_id, error = %e, "failed to release webhook lock");
        }

        result
    }

    async fn apply_webhook_locked(
        &self,
        payment_id: Uuid,
        status: GatewayStatus,
        gateway_order_id: Option<String>,
        gateway_transaction_id: Option<String>,
        payload: serde_json::Value,
    ) -> Result<WebhookOutcome, PaymentError> {
        let mut payment = match self.repo.get(payment_id).await {
            Ok(payment) => payment,
            Err(RepositoryError::NotFound(_)) => return Err(PaymentError::NotFound(payment_id)),
            Err(e) => return Err(e.into()),
        };

        payment.webhook_received = true;
        payment.webhook_received_at = Some(Utc::now());
        payment.webhook_payload = Some(payload);
        if payment.gateway_order_id.is_none() {
            payment.gateway_order_id = gateway_order_id;
        }
        if payment.gateway_transaction_id.is_none() {
            payment.gateway_transaction_id = gateway_transaction_id;
        }

        if payment.is_final() {
            tracing::info!(
                payment_id = %payment.id,
                status = %payment.status,
                "payment already in final state, ignoring webhook"
            );
            self.repo.update(&payment).await?;
            return Ok(WebhookOutcome::Ignored);
        }

        match status {
            GatewayStatus::Success => {
                payment.transition_to(PaymentStatus::Paid, "webhook")?;
                payment.cancel_reconciliation();
                self.repo.update(&payment).await?;
                self.notifier.payment_completed(&payment).await;
                Ok(WebhookOutcome::Applied(PaymentStatus::Paid))
            }
            GatewayStatus::Failed => {
                payment.transition_to(PaymentStatus::Failed, "webhook")?;
                payment.cancel_reconciliation();
                self.repo.update(&payment).await?;
                self.notifier.payment_failed(&payment).await;
                Ok(WebhookOutcome::Applied(PaymentStatus::Failed))
            }
            GatewayStatus::Pending => {
                if payment.status.can_transition_to(PaymentStatus::Processing) {
                    payment.transition_to(PaymentStatus::Processing, "webhook")?;
                }
                self.repo.update(&payment).await?;
                Ok(WebhookOutcome::Applied(payment.status))
            }
            GatewayStatus::Unknown => {
                tracing::warn!(payment_id = %payment.id, "webhook carried an unknown status, ignoring");
                self.repo.update(&payment).await?;
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

fn check_conflict(
    existing: PaymentTransaction,
    amount: &BigDecimal,
    currency: &str,
) -> Result<PaymentTransaction, PaymentError> {
    if existing.amount != *amount || existing.currency != currency {
        return Err(PaymentError::Conflict(format!(
            "idempotency key {} already used with amount {} {}",
            existing.idempotency_key, existing.amount, existing.currency
        )));
    }
    Ok(existing)
}

/// Deterministic key from trip + payer + amount + currency, for callers that
/// do not supply their own.
fn derive_idempotency_key(
    trip_reference: &str,
    payer_reference: &str,
    amount: &BigDecimal,
    currency: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!("{trip_reference}|{payer_reference}|{amount}|{currency}").as_bytes(),
    );
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_key_is_deterministic() {
        let a = derive_idempotency_key("trip-1", "user-1", &BigDecimal::from(50), "EGP");
        let b = derive_idempotency_key("trip-1", "user-1", &BigDecimal::from(50), "EGP");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn derived_key_changes_with_any_input() {
        let base = derive_idempotency_key("trip-1", "user-1", &BigDecimal::from(50), "EGP");
        assert_ne!(
            base,
            derive_idempotency_key("trip-2", "user-1", &BigDecimal::from(50), "EGP")
        );
        assert_ne!(
            base,
            derive_idempotency_key("trip-1", "user-1", &BigDecimal::from(51), "EGP")
        );
        assert_ne!(
            base,
            derive_idempotency_key("trip-1", "user-1", &BigDecimal::from(50), "USD")
        );
    }
}
