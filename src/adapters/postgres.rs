//! Postgres implementation of [`PaymentRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{PaymentStatus, PaymentTransaction, StateTransition};
use crate::ports::{PaymentRepository, RepositoryError, RepositoryResult};

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db)
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                RepositoryError::DuplicateKey(db.message().to_string())
            }
            _ => RepositoryError::Backend(err.to_string()),
        }
    }
}

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Postgres-backed payment repository.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_transitions(&self, payment_id: Uuid) -> RepositoryResult<Vec<StateTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT seq, from_state, to_state, cause, transitioned_at
             FROM payment_state_transitions WHERE payment_id = $1 ORDER BY seq ASC",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRow::into_domain).collect()
    }

    async fn hydrate(&self, row: PaymentRow) -> RepositoryResult<PaymentTransaction> {
        let transitions = self.load_transitions(row.id).await?;
        row.into_domain(transitions)
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, payment: &PaymentTransaction) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, idempotency_key, trip_reference, payer_reference, amount, currency,
                status, gateway_order_id, gateway_transaction_id,
                webhook_received, webhook_received_at, webhook_payload,
                retry_count, last_retry_at,
                reconciliation_attempts, last_reconciliation_at, next_reconciliation_at,
                gateway_sent_at, gateway_responded_at, metadata, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            "#,
        )
        .bind(payment.id)
        .bind(&payment.idempotency_key)
        .bind(&payment.trip_reference)
        .bind(&payment.payer_reference)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_transaction_id)
        .bind(payment.webhook_received)
        .bind(payment.webhook_received_at)
        .bind(&payment.webhook_payload)
        .bind(payment.retry_count)
        .bind(payment.last_retry_at)
        .bind(payment.reconciliation_attempts)
        .bind(payment.last_reconciliation_at)
        .bind(payment.next_reconciliation_at)
        .bind(payment.gateway_sent_at)
        .bind(payment.gateway_responded_at)
        .bind(&payment.metadata)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, payment: &PaymentTransaction) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_transactions SET
                status = $2,
                gateway_order_id = $3,
                gateway_transaction_id = $4,
                webhook_received = $5,
                webhook_received_at = $6,
                webhook_payload = $7,
                retry_count = $8,
                last_retry_at = $9,
                reconciliation_attempts = $10,
                last_reconciliation_at = $11,
                next_reconciliation_at = $12,
                gateway_sent_at = $13,
                gateway_responded_at = $14,
                metadata = $15,
                updated_at = $16
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_transaction_id)
        .bind(payment.webhook_received)
        .bind(payment.webhook_received_at)
        .bind(&payment.webhook_payload)
        .bind(payment.retry_count)
        .bind(payment.last_retry_at)
        .bind(payment.reconciliation_attempts)
        .bind(payment.last_reconciliation_at)
        .bind(payment.next_reconciliation_at)
        .bind(payment.gateway_sent_at)
        .bind(payment.gateway_responded_at)
        .bind(&payment.metadata)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound(payment.id.to_string()));
        }

        // The log is append-only; ON CONFLICT DO NOTHING makes re-saving a
        // transaction with already-persisted entries idempotent.
        for transition in &payment.transitions {
            sqlx::query(
                r#"
                INSERT INTO payment_state_transitions
                    (payment_id, seq, from_state, to_state, cause, transitioned_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (payment_id, seq) DO NOTHING
                "#,
            )
            .bind(payment.id)
            .bind(transition.seq)
            .bind(transition.from_state.as_str())
            .bind(transition.to_state.as_str())
            .bind(&transition.cause)
            .bind(transition.transitioned_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<PaymentTransaction> {
        let row =
            sqlx::query_as::<_, PaymentRow>("SELECT * FROM payment_transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => self.hydrate(row).await,
            None => Err(RepositoryError::NotFound(id.to_string())),
        }
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> RepositoryResult<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payment_transactions WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_gateway_order_id(
        &self,
        order_id: &str,
    ) -> RepositoryResult<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payment_transactions WHERE gateway_order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn due_for_reconciliation(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<PaymentTransaction>> {
        // Mirrors PaymentTransaction::reconciliation_due. NULL means a
        // submission whose outcome was never recorded, due immediately;
        // NULLS FIRST puts those crashed submissions ahead of the queue.
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payment_transactions
            WHERE status IN ('pending_gateway', 'processing', 'unknown')
              AND (next_reconciliation_at IS NULL OR next_reconciliation_at <= $1)
            ORDER BY next_reconciliation_at ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut payments = Vec::with_capacity(rows.len());
        for row in rows {
            payments.push(self.hydrate(row).await?);
        }
        Ok(payments)
    }

    async fn stale_created(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<PaymentTransaction>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payment_transactions
            WHERE status = 'created' AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut payments = Vec::with_capacity(rows.len());
        for row in rows {
            payments.push(self.hydrate(row).await?);
        }
        Ok(payments)
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    idempotency_key: String,
    trip_reference: String,
    payer_reference: String,
    amount: bigdecimal::BigDecimal,
    currency: String,
    status: String,
    gateway_order_id: Option<String>,
    gateway_transaction_id: Option<String>,
    webhook_received: bool,
    webhook_received_at: Option<DateTime<Utc>>,
    webhook_payload: Option<serde_json::Value>,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    reconciliation_attempts: i32,
    last_reconciliation_at: Option<DateTime<Utc>>,
    next_reconciliation_at: Option<DateTime<Utc>>,
    gateway_sent_at: Option<DateTime<Utc>>,
    gateway_responded_at: Option<DateTime<Utc>>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_domain(
        self,
        transitions: Vec<StateTransition>,
    ) -> RepositoryResult<PaymentTransaction> {
        let status = parse_status(&self.status)?;
        Ok(PaymentTransaction {
            id: self.id,
            idempotency_key: self.idempotency_key,
            trip_reference: self.trip_reference,
            payer_reference: self.payer_reference,
            amount: self.amount,
            currency: self.currency,
            status,
            gateway_order_id: self.gateway_order_id,
            gateway_transaction_id: self.gateway_transaction_id,
            webhook_received: self.webhook_received,
            webhook_received_at: self.webhook_received_at,
            webhook_payload: self.webhook_payload,
            retry_count: self.retry_count,
            last_retry_at: self.last_retry_at,
            reconciliation_attempts: self.reconciliation_attempts,
            last_reconciliation_at: self.last_reconciliation_at,
            next_reconciliation_at: self.next_reconciliation_at,
            gateway_sent_at: self.gateway_sent_at,
            gateway_responded_at: self.gateway_responded_at,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
            transitions,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransitionRow {
    seq: i32,
    from_state: String,
    to_state: String,
    cause: String,
    transitioned_at: DateTime<Utc>,
}

impl TransitionRow {
    fn into_domain(self) -> RepositoryResult<StateTransition> {
        Ok(StateTransition {
            seq: self.seq,
            from_state: parse_status(&self.from_state)?,
            to_state: parse_status(&self.to_state)?,
            cause: self.cause,
            transitioned_at: self.transitioned_at,
        })
    }
}

fn parse_status(raw: &str) -> RepositoryResult<PaymentStatus> {
    PaymentStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Backend(format!("unknown payment status in row: {raw}")))
}
