//! Gateway-facing types shared by every adapter implementation.

use bigdecimal::BigDecimal;
use uuid::Uuid;

pub mod kashier;

pub use kashier::KashierClient;

/// Normalized gateway outcome. Everything the provider can say, including
/// timeouts and malformed responses, collapses into these four categories;
/// the rest of the engine never sees provider-specific status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
    Unknown,
}

impl GatewayStatus {
    /// Map a provider status string onto the normalized categories. Anything
    /// unrecognized is `Unknown` and goes to reconciliation.
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "SUCCESS" | "PAID" | "COMPLETED" => GatewayStatus::Success,
            "FAILED" | "DECLINED" | "REJECTED" | "CANCELLED" => GatewayStatus::Failed,
            "PENDING" | "PROCESSING" => GatewayStatus::Pending,
            _ => GatewayStatus::Unknown,
        }
    }
}

/// Order creation request handed to the gateway adapter. The merchant order
/// id is our payment id; the gateway round-trips it in webhooks, which is how
/// callbacks correlate back to a transaction.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub merchant_order_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_reference: String,
    pub description: String,
}

/// Normalized view of one gateway response.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub status: GatewayStatus,
    pub order_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Human-readable detail for logging; never used for control flow.
    pub detail: Option<String>,
}

impl OrderSnapshot {
    pub fn unknown(detail: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Unknown,
            order_id: None,
            transaction_id: None,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_normalize_to_four_categories() {
        assert_eq!(GatewayStatus::from_provider("SUCCESS"), GatewayStatus::Success);
        assert_eq!(GatewayStatus::from_provider("paid"), GatewayStatus::Success);
        assert_eq!(GatewayStatus::from_provider("Completed"), GatewayStatus::Success);
        assert_eq!(GatewayStatus::from_provider("FAILED"), GatewayStatus::Failed);
        assert_eq!(GatewayStatus::from_provider("declined"), GatewayStatus::Failed);
        assert_eq!(GatewayStatus::from_provider("REJECTED"), GatewayStatus::Failed);
        assert_eq!(GatewayStatus::from_provider("PENDING"), GatewayStatus::Pending);
        assert_eq!(GatewayStatus::from_provider("processing"), GatewayStatus::Pending);
        assert_eq!(GatewayStatus::from_provider("SERVER_ERROR"), GatewayStatus::Unknown);
        assert_eq!(GatewayStatus::from_provider(""), GatewayStatus::Unknown);
    }
}
