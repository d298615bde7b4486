use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::services::PaymentError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Conflict(msg) => AppError::Conflict(msg),
            PaymentError::NotFound(id) => AppError::NotFound(format!("payment {}", id)),
            PaymentError::Locked(id) => {
                AppError::Conflict(format!("payment {} is already being processed", id))
            }
            PaymentError::NotRetryable { id, status } => AppError::Conflict(format!(
                "payment {} in status {} cannot be retried",
                id, status
            )),
            PaymentError::IllegalTransition(e) => {
                // Design-level bug signal, never a caller mistake.
                tracing::error!(error = %e, "illegal state transition reached the HTTP boundary");
                AppError::Internal(e.to_string())
            }
            PaymentError::Repository(RepositoryError::NotFound(id)) => {
                AppError::NotFound(format!("payment {}", id))
            }
            PaymentError::Repository(e) => AppError::Internal(e.to_string()),
            PaymentError::LockBackend(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_400() {
        let error = AppError::BadRequest("missing order id".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let error = AppError::Unauthorized("invalid signature".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn conflict_maps_to_409() {
        let error = AppError::Conflict("idempotency key reused".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn payment_conflict_converts_to_conflict() {
        let err: AppError = PaymentError::Conflict("amount mismatch".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn not_found_response_has_404_status() {
        let error = AppError::NotFound("payment abc".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
