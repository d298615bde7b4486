//! In-memory implementations of the repository and lock ports. Used by the
//! test suite and for running the engine locally without Postgres/Redis;
//! they honor the same contracts as the production adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{PaymentStatus, PaymentTransaction};
use crate::ports::{
    LockToken, PaymentLock, PaymentRepository, RepositoryError, RepositoryResult,
};

#[derive(Clone, Default)]
pub struct InMemoryPaymentRepository {
    payments: Arc<Mutex<HashMap<Uuid, PaymentTransaction>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions. Test helper.
    pub async fn len(&self) -> usize {
        self.payments.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.lock().await.is_empty()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &PaymentTransaction) -> RepositoryResult<()> {
        let mut payments = self.payments.lock().await;
        if payments
            .values()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(RepositoryError::DuplicateKey(
                payment.idempotency_key.clone(),
            ));
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update(&self, payment: &PaymentTransaction) -> RepositoryResult<()> {
        let mut payments = self.payments.lock().await;
        if !payments.contains_key(&payment.id) {
            return Err(RepositoryError::NotFound(payment.id.to_string()));
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<PaymentTransaction> {
        self.payments
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> RepositoryResult<Option<PaymentTransaction>> {
        Ok(self
            .payments
            .lock()
            .await
            .values()
            .find(|p| p.idempotency_key == key)
            .cloned())
    }

    async fn find_by_gateway_order_id(
        &self,
        order_id: &str,
    ) -> RepositoryResult<Option<PaymentTransaction>> {
        Ok(self
            .payments
            .lock()
            .await
            .values()
            .find(|p| p.gateway_order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn due_for_reconciliation(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<PaymentTransaction>> {
        let payments = self.payments.lock().await;
        let mut due: Vec<PaymentTransaction> = payments
            .values()
            .filter(|p| p.reconciliation_due(now))
            .cloned()
            .collect();
        // None sorts first: unscheduled (crashed) submissions before
        // scheduled ones, same as the SQL's NULLS FIRST.
        due.sort_by_key(|p| p.next_reconciliation_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn stale_created(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<PaymentTransaction>> {
        let payments = self.payments.lock().await;
        let mut stale: Vec<PaymentTransaction> = payments
            .values()
            .filter(|p| p.status == PaymentStatus::Created && p.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }
}

struct HeldLock {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Single-process stand-in for the Redis lock, with the same TTL semantics.
#[derive(Clone, Default)]
pub struct InMemoryPaymentLock {
    locks: Arc<Mutex<HashMap<Uuid, HeldLock>>>,
}

impl InMemoryPaymentLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLock for InMemoryPaymentLock {
    async fn try_acquire(
        &self,
        payment_id: Uuid,
        ttl: Duration,
    ) -> anyhow::Result<Option<LockToken>> {
        let mut locks = self.locks.lock().await;
        let now = Utc::now();

        if let Some(held) = locks.get(&payment_id) {
            if held.expires_at > now {
                return Ok(None);
            }
        }

        let token = Uuid::new_v4().to_string();
        locks.insert(
            payment_id,
            HeldLock {
                token: token.clone(),
                expires_at: now + chrono::Duration::from_std(ttl)?,
            },
        );
        Ok(Some(LockToken(token)))
    }

    async fn release(&self, payment_id: Uuid, token: &LockToken) -> anyhow::Result<()> {
        let mut locks = self.locks.lock().await;
        if let Some(held) = locks.get(&payment_id) {
            if held.token == token.0 {
                locks.remove(&payment_id);
            }
        }
        Ok(())
    }
}
