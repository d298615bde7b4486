//! Payment transaction domain entity and its state machine.
//! Framework-agnostic: no database or HTTP types leak in here.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle status of a payment transaction.
///
/// `Paid` and `Failed` are terminal: once reached, the transaction never
/// transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    PendingGateway,
    Processing,
    Paid,
    Failed,
    Unknown,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::PendingGateway => "pending_gateway",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(PaymentStatus::Created),
            "pending_gateway" => Some(PaymentStatus::PendingGateway),
            "processing" => Some(PaymentStatus::Processing),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "unknown" => Some(PaymentStatus::Unknown),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed)
    }

    /// Fixed adjacency table. `Created -> Failed` exists so a payment that
    /// exhausts its pre-submission retries can be closed out without ever
    /// having touched the gateway.
    pub fn allowed_transitions(&self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Created => &[PendingGateway, Failed, Unknown],
            PendingGateway => &[Processing, Paid, Failed, Unknown],
            Processing => &[Paid, Failed, Unknown],
            Paid => &[],
            Failed => &[],
            Unknown => &[Processing, Paid, Failed],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal payment state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

/// One entry of the append-only transition log. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub seq: i32,
    pub from_state: PaymentStatus,
    pub to_state: PaymentStatus,
    pub cause: String,
    pub transitioned_at: DateTime<Utc>,
}

/// Durable record of one monetary charge against the gateway.
///
/// `(amount, currency, trip_reference)` is immutable after creation; status
/// changes go through [`PaymentTransaction::transition_to`] only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub idempotency_key: String,
    pub trip_reference: String,
    pub payer_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub webhook_received: bool,
    pub webhook_received_at: Option<DateTime<Utc>>,
    pub webhook_payload: Option<serde_json::Value>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub reconciliation_attempts: i32,
    pub last_reconciliation_at: Option<DateTime<Utc>>,
    pub next_reconciliation_at: Option<DateTime<Utc>>,
    pub gateway_sent_at: Option<DateTime<Utc>>,
    pub gateway_responded_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transitions: Vec<StateTransition>,
}

impl PaymentTransaction {
    pub fn new(
        trip_reference: String,
        payer_reference: String,
        amount: BigDecimal,
        currency: String,
        idempotency_key: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            trip_reference,
            payer_reference,
            amount,
            currency,
            status: PaymentStatus::Created,
            gateway_order_id: None,
            gateway_transaction_id: None,
            webhook_received: false,
            webhook_received_at: None,
            webhook_payload: None,
            retry_count: 0,
            last_retry_at: None,
            reconciliation_attempts: 0,
            last_reconciliation_at: None,
            next_reconciliation_at: None,
            gateway_sent_at: None,
            gateway_responded_at: None,
            metadata,
            created_at: now,
            updated_at: now,
            transitions: Vec::new(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Apply a status change through the adjacency table. Every accepted
    /// transition appends exactly one entry to the transition log. An illegal
    /// request leaves the transaction untouched and is reported back; callers
    /// log it as a bug signal rather than swallowing it.
    pub fn transition_to(
        &mut self,
        next: PaymentStatus,
        cause: &str,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.transitions.push(StateTransition {
            seq: self.transitions.len() as i32,
            from_state: self.status,
            to_state: next,
            cause: cause.to_string(),
            transitioned_at: now,
        });
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record one reconciliation attempt and compute when the next one is
    /// due, with capped exponential backoff. The scheduler must never poll
    /// earlier than `next_reconciliation_at`.
    pub fn schedule_reconciliation(&mut self, initial_delay_secs: u64, max_delay_secs: u64) {
        let now = Utc::now();
        self.reconciliation_attempts += 1;
        self.last_reconciliation_at = Some(now);

        let delay = reconciliation_delay(
            self.reconciliation_attempts as u32,
            initial_delay_secs,
            max_delay_secs,
        );
        self.next_reconciliation_at = Some(now + chrono::Duration::seconds(delay as i64));
        self.updated_at = now;
    }

    pub fn cancel_reconciliation(&mut self) {
        self.next_reconciliation_at = None;
    }

    /// Whether the reconciliation sweep should pick this transaction up at
    /// `now`. A submitted status with no `next_reconciliation_at` means the
    /// process died between the durable `pending_gateway` write and the
    /// gateway response; that payment is due immediately, not never. The
    /// repository queries mirror this predicate.
    pub fn reconciliation_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            PaymentStatus::PendingGateway | PaymentStatus::Processing | PaymentStatus::Unknown
        ) && self.next_reconciliation_at.map_or(true, |at| at <= now)
    }
}

/// Backoff delay in seconds for the given attempt number (1-based):
/// `min(initial * 2^attempt, max)`.
pub fn reconciliation_delay(attempt: u32, initial_delay_secs: u64, max_delay_secs: u64) -> u64 {
    let factor = 2u64.saturating_pow(attempt.min(32));
    initial_delay_secs
        .saturating_mul(factor)
        .min(max_delay_secs)
}
