mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use common::{engine, snapshot, TestEngine};
use fareflow::domain::PaymentStatus;
use fareflow::gateway::{kashier, GatewayStatus};
use fareflow::services::CreatePaymentRequest;
use fareflow::{create_app, AppState};

const SECRET: &str = "key1$s3cret-webhook-key";

fn app(engine: &TestEngine) -> axum::Router {
    create_app(AppState {
        payments: engine.payments.clone(),
        webhook_secret: SECRET.to_string(),
        db: None,
    })
}

fn signed(fields: Map<String, Value>) -> Value {
    let mut fields = fields;
    let signature = kashier::sign_payload(SECRET, &fields);
    fields.insert("signature".to_string(), Value::String(signature));
    Value::Object(fields)
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A payment sitting in `processing` with a recorded gateway order id, the
/// state a webhook normally finds.
async fn processing_payment(engine: &TestEngine, order_id: &str) -> uuid::Uuid {
    engine
        .gateway
        .push_create(snapshot(GatewayStatus::Pending, order_id))
        .await;
    let created = engine
        .payments
        .create_payment(CreatePaymentRequest {
            trip_reference: "trip-1".to_string(),
            payer_reference: "rider-1".to_string(),
            amount: bigdecimal::BigDecimal::from(75),
            currency: None,
            idempotency_key: None,
            metadata: None,
        })
        .await
        .unwrap();
    engine.payments.process_payment(created.id).await.unwrap();
    created.id
}

fn webhook_fields(merchant_order_id: &str, order_id: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        "merchantOrderId".to_string(),
        Value::String(merchant_order_id.to_string()),
    );
    fields.insert("orderId".to_string(), Value::String(order_id.to_string()));
    fields.insert(
        "transactionId".to_string(),
        Value::String(format!("txn-{order_id}")),
    );
    fields.insert(
        "paymentStatus".to_string(),
        Value::String("SUCCESS".to_string()),
    );
    fields
}

#[tokio::test]
async fn signed_webhook_resolves_payment() {
    let engine = engine();
    let payment_id = processing_payment(&engine, "ord-1").await;

    let payload = signed(webhook_fields(&payment_id.to_string(), "ord-1"));
    let response = app(&engine)
        .oneshot(post("/webhooks/kashier", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "applied");

    let resolved = engine.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(resolved.status, PaymentStatus::Paid);
    assert!(resolved.webhook_received);
}

#[tokio::test]
async fn webhook_with_tampered_signature_is_unauthorized() {
    let engine = engine();
    let payment_id = processing_payment(&engine, "ord-1").await;

    let mut payload = signed(webhook_fields(&payment_id.to_string(), "ord-1"));
    payload["paymentStatus"] = Value::String("FAILED".to_string());

    let response = app(&engine)
        .oneshot(post("/webhooks/kashier", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The payment is untouched.
    let payment = engine.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Processing);
}

#[tokio::test]
async fn webhook_without_signature_is_unauthorized() {
    let engine = engine();
    let payment_id = processing_payment(&engine, "ord-1").await;

    let payload = Value::Object(webhook_fields(&payment_id.to_string(), "ord-1"));
    let response = app(&engine)
        .oneshot(post("/webhooks/kashier", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_without_merchant_order_id_is_bad_request() {
    let engine = engine();

    let mut fields = Map::new();
    fields.insert(
        "paymentStatus".to_string(),
        Value::String("SUCCESS".to_string()),
    );
    let response = app(&engine)
        .oneshot(post("/webhooks/kashier", &signed(fields)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_acknowledged() {
    let engine = engine();

    let payload = signed(webhook_fields(&uuid::Uuid::new_v4().to_string(), "ord-9"));
    let response = app(&engine)
        .oneshot(post("/webhooks/kashier", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ignored");
}

#[tokio::test]
async fn webhook_falls_back_to_gateway_order_id_lookup() {
    let engine = engine();
    let payment_id = processing_payment(&engine, "ord-1").await;

    // Some providers echo their own order id instead of ours.
    let payload = signed(webhook_fields("ord-1", "ord-1"));
    let response = app(&engine)
        .oneshot(post("/webhooks/kashier", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let resolved = engine.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(resolved.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn create_payment_endpoint_charges_and_returns_paid() {
    let engine = engine();
    engine
        .gateway
        .push_create(snapshot(GatewayStatus::Success, "ord-1"))
        .await;

    let body = json!({
        "trip_reference": "trip-1",
        "payer_reference": "rider-1",
        "amount": "75.00",
    });
    let response = app(&engine).oneshot(post("/payments", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let payment = body_json(response).await;
    assert_eq!(payment["status"], "paid");
    assert_eq!(payment["currency"], "EGP");
    assert_eq!(payment["gateway_order_id"], "ord-1");
}

#[tokio::test]
async fn create_payment_endpoint_reports_processing_for_pending_charges() {
    let engine = engine();
    engine
        .gateway
        .push_create(snapshot(GatewayStatus::Pending, "ord-1"))
        .await;

    let body = json!({
        "trip_reference": "trip-1",
        "payer_reference": "rider-1",
        "amount": "75.00",
    });
    let response = app(&engine).oneshot(post("/payments", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "processing");
}

#[tokio::test]
async fn create_payment_rejects_non_positive_amounts() {
    let engine = engine();

    let body = json!({
        "trip_reference": "trip-1",
        "payer_reference": "rider-1",
        "amount": "0",
    });
    let response = app(&engine).oneshot(post("/payments", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(engine.repo.is_empty().await);
}

#[tokio::test]
async fn get_payment_returns_404_for_unknown_id() {
    let engine = engine();

    let request = Request::builder()
        .uri(format!("/payments/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = app(&engine).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_reports_healthy_without_database() {
    let engine = engine();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app(&engine).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["database"], "not_configured");
}
