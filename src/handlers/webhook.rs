//! Kashier webhook endpoint. Signature verification happens here, before
//! anything touches the database; everything past this file trusts the
//! payload. Unknown payments are acknowledged with 2xx so the gateway stops
//! redelivering, but loudly logged.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::gateway::{kashier, GatewayStatus};
use crate::services::{PaymentError, WebhookOutcome};
use crate::AppState;

pub async fn kashier_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let Some(fields) = payload.as_object() else {
        return Err(AppError::BadRequest(
            "webhook payload must be a JSON object".to_string(),
        ));
    };

    let signature = fields
        .get("signature")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-kashier-signature")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        });
    let Some(signature) = signature else {
        tracing::warn!("webhook rejected: no signature provided");
        return Err(AppError::Unauthorized(
            "missing webhook signature".to_string(),
        ));
    };
    if !kashier::verify_signature(&state.webhook_secret, fields, &signature) {
        tracing::warn!("webhook rejected: signature verification failed");
        return Err(AppError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let Some(merchant_order_id) = fields.get("merchantOrderId").and_then(Value::as_str) else {
        return Err(AppError::BadRequest(
            "webhook missing merchantOrderId".to_string(),
        ));
    };

    let raw_status = fields
        .get("paymentStatus")
        .or_else(|| fields.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let status = GatewayStatus::from_provider(raw_status);
    let gateway_order_id = fields
        .get("orderId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let gateway_transaction_id = fields
        .get("transactionId")
        .and_then(Value::as_str)
        .map(str::to_string);

    // The merchant order id is our payment id, round-tripped through the
    // gateway. Fall back to the gateway's own order id for providers that
    // echo theirs instead.
    let payment_id = match Uuid::parse_str(merchant_order_id) {
        Ok(id) => Some(id),
        Err(_) => state
            .payments
            .find_by_gateway_order_id(merchant_order_id)
            .await?
            .map(|p| p.id),
    };
    let Some(payment_id) = payment_id else {
        tracing::warn!(
            merchant_order_id,
            "webhook for unknown payment, acknowledging without action"
        );
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    };

    match state
        .payments
        .apply_webhook(
            payment_id,
            status,
            gateway_order_id,
            gateway_transaction_id,
            payload.clone(),
        )
        .await
    {
        Ok(outcome) => {
            let label = match outcome {
                WebhookOutcome::Applied(status) => {
                    tracing::info!(payment_id = %payment_id, status = %status, "webhook applied");
                    "applied"
                }
                WebhookOutcome::Ignored => "ignored",
                // 2xx anyway; redelivery will land once the lock clears.
                WebhookOutcome::Busy => "deferred",
            };
            Ok((StatusCode::OK, Json(json!({ "status": label }))))
        }
        Err(PaymentError::NotFound(id)) => {
            tracing::warn!(payment_id = %id, "webhook for unknown payment, acknowledging without action");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))))
        }
        Err(e) => Err(e.into()),
    }
}
