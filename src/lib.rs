pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ports;
pub mod services;
pub mod startup;
pub mod workers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    /// Kashier shared secret, used to verify webhook signatures.
    pub webhook_secret: String,
    /// Absent when running against the in-memory adapters in tests.
    pub db: Option<sqlx::PgPool>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route("/webhooks/kashier", post(handlers::webhook::kashier_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
