use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{PaymentStatus, PaymentTransaction};
use crate::error::AppError;
use crate::services::{CreatePaymentRequest, PaymentError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub trip_reference: String,
    pub payer_reference: String,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub trip_reference: String,
    pub payer_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: &'static str,
    pub gateway_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentResponse {
    fn from_payment(payment: &PaymentTransaction) -> Self {
        PaymentResponse {
            id: payment.id,
            trip_reference: payment.trip_reference.clone(),
            payer_reference: payment.payer_reference.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            status: public_status(payment.status),
            gateway_order_id: payment.gateway_order_id.clone(),
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

/// Riders only ever see three states. The internal distinctions between
/// `created`, `pending_gateway`, `processing` and `unknown` are operational
/// detail, not something a client should branch on.
fn public_status(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Paid => "paid",
        PaymentStatus::Failed => "failed",
        _ => "processing",
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.amount <= BigDecimal::from(0) {
        return Err(AppError::BadRequest("amount must be positive".to_string()));
    }
    if body.trip_reference.is_empty() || body.payer_reference.is_empty() {
        return Err(AppError::BadRequest(
            "trip_reference and payer_reference are required".to_string(),
        ));
    }

    let payment = state
        .payments
        .create_payment(CreatePaymentRequest {
            trip_reference: body.trip_reference,
            payer_reference: body.payer_reference,
            amount: body.amount,
            currency: body.currency,
            idempotency_key: body.idempotency_key,
            metadata: body.metadata,
        })
        .await?;

    // Drive the charge immediately. If another worker already holds the
    // lock the caller still gets the transaction back; the outcome will
    // land via webhook or reconciliation.
    let payment = match state.payments.process_payment(payment.id).await {
        Ok(processed) => processed,
        Err(PaymentError::Locked(_)) => payment,
        Err(e) => return Err(e.into()),
    };

    let code = if payment.is_final() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((code, Json(PaymentResponse::from_payment(&payment))))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.payments.get_payment(id).await?;
    Ok(Json(PaymentResponse::from_payment(&payment)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_terminal_statuses_read_as_processing() {
        assert_eq!(public_status(PaymentStatus::Created), "processing");
        assert_eq!(public_status(PaymentStatus::PendingGateway), "processing");
        assert_eq!(public_status(PaymentStatus::Processing), "processing");
        assert_eq!(public_status(PaymentStatus::Unknown), "processing");
        assert_eq!(public_status(PaymentStatus::Paid), "paid");
        assert_eq!(public_status(PaymentStatus::Failed), "failed");
    }
}
