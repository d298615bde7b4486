//! HTTP adapter for the Kashier payment gateway.
//!
//! Translates engine requests into Kashier's order API and classifies every
//! outcome into [`GatewayStatus`]. A definitive decline is `Failed`; anything
//! ambiguous (timeout, 5xx, malformed body, open circuit breaker) is
//! `Unknown` so the reconciliation path takes over instead of risking a
//! duplicate charge.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::config::GatewayConfig;
use crate::gateway::{GatewayStatus, OrderRequest, OrderSnapshot};
use crate::ports::PaymentGateway;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum KashierError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway server error: HTTP {0}")]
    Server(u16),

    #[error("invalid response from gateway: {0}")]
    Malformed(String),
}

/// HTTP client for the Kashier order API.
#[derive(Clone)]
pub struct KashierClient {
    client: Client,
    base_url: String,
    merchant_id: String,
    api_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl KashierClient {
    pub fn new(config: &GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        KashierClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            merchant_id: config.merchant_id.clone(),
            api_key: config.api_key.clone(),
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    async fn create_order_inner(&self, request: &OrderRequest) -> Result<OrderSnapshot, KashierError> {
        let url = format!("{}/v3/orders", self.base_url);
        let payload = serde_json::json!({
            "merchantId": self.merchant_id,
            "merchantOrderId": request.merchant_order_id,
            "amount": {
                "value": request.amount.to_string(),
                "currency": request.currency,
            },
            "customer": { "id": request.payer_reference },
            "orderItems": [{
                "name": request.description,
                "quantity": 1,
                "price": request.amount.to_string(),
            }],
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(KashierError::Server(status.as_u16()));
        }
        if status.is_client_error() {
            // The gateway rejected the order outright: a definitive failure,
            // not an ambiguous one.
            let body = response.text().await.unwrap_or_default();
            return Ok(OrderSnapshot {
                status: GatewayStatus::Failed,
                order_id: None,
                transaction_id: None,
                detail: Some(format!("gateway rejected order: HTTP {} {}", status, body)),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KashierError::Malformed(e.to_string()))?;
        Ok(normalize(&body))
    }

    async fn query_order_inner(&self, order_id: &str) -> Result<OrderSnapshot, KashierError> {
        let url = format!("{}/v3/orders/{}", self.base_url, order_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(KashierError::Server(status.as_u16()));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            // The order may not exist yet; only reconciliation exhaustion
            // turns this into a business decision.
            return Ok(OrderSnapshot::unknown("order not found at gateway"));
        }
        if status.is_client_error() {
            return Ok(OrderSnapshot::unknown(format!(
                "status query rejected: HTTP {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KashierError::Malformed(e.to_string()))?;
        Ok(normalize(&body))
    }
}

#[async_trait]
impl PaymentGateway for KashierClient {
    async fn create_order(&self, request: &OrderRequest) -> OrderSnapshot {
        let result = self
            .circuit_breaker
            .call(self.create_order_inner(request))
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(FailsafeError::Rejected) => {
                OrderSnapshot::unknown("gateway circuit breaker is open")
            }
            Err(FailsafeError::Inner(e)) => OrderSnapshot::unknown(e.to_string()),
        }
    }

    async fn query_order_status(&self, order_id: &str) -> OrderSnapshot {
        let result = self
            .circuit_breaker
            .call(self.query_order_inner(order_id))
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(FailsafeError::Rejected) => {
                OrderSnapshot::unknown("gateway circuit breaker is open")
            }
            Err(FailsafeError::Inner(e)) => OrderSnapshot::unknown(e.to_string()),
        }
    }
}

fn normalize(body: &Value) -> OrderSnapshot {
    let raw_status = body.get("status").and_then(Value::as_str).unwrap_or("");
    OrderSnapshot {
        status: GatewayStatus::from_provider(raw_status),
        order_id: body
            .get("orderId")
            .or_else(|| body.get("order_id"))
            .and_then(Value::as_str)
            .map(String::from),
        transaction_id: body
            .get("transactionId")
            .or_else(|| body.get("transaction_id"))
            .and_then(Value::as_str)
            .map(String::from),
        detail: body
            .get("messages")
            .and_then(|m| m.get("en"))
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn webhook_mac(secret_key: &str, payload: &serde_json::Map<String, Value>) -> HmacSha256 {
    // Kashier secrets have the form "key_id$secret"; only the part after the
    // dollar sign keys the HMAC.
    let secret = secret_key.split('$').nth(1).unwrap_or(secret_key);

    let mut pairs: Vec<(&str, String)> = payload
        .iter()
        .filter(|(key, _)| key.as_str() != "signature")
        .map(|(key, value)| (key.as_str(), value_to_string(value)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    let query = serializer.finish();

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    mac
}

/// Hex HMAC-SHA256 over the payload's fields (minus `signature`), sorted by
/// key and form-urlencoded. Matches what Kashier sends in its webhooks.
pub fn sign_payload(secret_key: &str, payload: &serde_json::Map<String, Value>) -> String {
    hex::encode(webhook_mac(secret_key, payload).finalize().into_bytes())
}

/// Constant-time webhook signature verification.
pub fn verify_signature(
    secret_key: &str,
    payload: &serde_json::Map<String, Value>,
    signature: &str,
) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    webhook_mac(secret_key, payload).verify_slice(&provided).is_ok()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    fn test_config(base_url: String) -> GatewayConfig {
        GatewayConfig {
            base_url,
            merchant_id: "MID-TEST-1".to_string(),
            api_key: "test-api-key".to_string(),
            secret_key: "key-id$test-secret".to_string(),
            currency: "EGP".to_string(),
            timeout_secs: 5,
        }
    }

    fn order_request() -> OrderRequest {
        OrderRequest {
            merchant_order_id: Uuid::new_v4(),
            amount: BigDecimal::from(50),
            currency: "EGP".to_string(),
            payer_reference: "user-1".to_string(),
            description: "Trip payment".to_string(),
        }
    }

    #[tokio::test]
    async fn create_order_success_is_classified_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/orders")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"SUCCESS","orderId":"ord-1","transactionId":"txn-1"}"#)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        let snapshot = client.create_order(&order_request()).await;

        assert_eq!(snapshot.status, GatewayStatus::Success);
        assert_eq!(snapshot.order_id.as_deref(), Some("ord-1"));
        assert_eq!(snapshot.transaction_id.as_deref(), Some("txn-1"));
    }

    #[tokio::test]
    async fn declined_order_is_classified_failed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/orders")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"DECLINED","orderId":"ord-2"}"#)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        let snapshot = client.create_order(&order_request()).await;

        assert_eq!(snapshot.status, GatewayStatus::Failed);
    }

    #[tokio::test]
    async fn client_error_is_a_definitive_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/orders")
            .with_status(422)
            .with_body(r#"{"error":"invalid amount"}"#)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        let snapshot = client.create_order(&order_request()).await;

        assert_eq!(snapshot.status, GatewayStatus::Failed);
    }

    #[tokio::test]
    async fn server_error_is_classified_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/orders")
            .with_status(500)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        let snapshot = client.create_order(&order_request()).await;

        assert_eq!(snapshot.status, GatewayStatus::Unknown);
    }

    #[tokio::test]
    async fn query_not_found_is_classified_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v3/orders/ord-404")
            .with_status(404)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        let snapshot = client.query_order_status("ord-404").await;

        assert_eq!(snapshot.status, GatewayStatus::Unknown);
    }

    #[tokio::test]
    async fn query_returns_pending_while_gateway_processes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v3/orders/ord-3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"PENDING","orderId":"ord-3"}"#)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        let snapshot = client.query_order_status("ord-3").await;

        assert_eq!(snapshot.status, GatewayStatus::Pending);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_consecutive_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/orders")
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = KashierClient::new(&test_config(server.url()));
        for _ in 0..3 {
            let snapshot = client.create_order(&order_request()).await;
            assert_eq!(snapshot.status, GatewayStatus::Unknown);
        }

        assert_eq!(client.circuit_state(), "open");
        let snapshot = client.create_order(&order_request()).await;
        assert_eq!(snapshot.status, GatewayStatus::Unknown);
        assert_eq!(
            snapshot.detail.as_deref(),
            Some("gateway circuit breaker is open")
        );
    }

    #[test]
    fn signature_round_trips() {
        let payload = serde_json::json!({
            "merchantOrderId": "pay-1",
            "paymentStatus": "SUCCESS",
            "amount": "50.00",
        });
        let map = payload.as_object().unwrap();

        let signature = sign_payload("key-id$test-secret", map);
        assert!(verify_signature("key-id$test-secret", map, &signature));
    }

    #[test]
    fn signature_ignores_the_signature_field_itself() {
        let without = serde_json::json!({"merchantOrderId": "pay-1", "paymentStatus": "SUCCESS"});
        let signature = sign_payload("key-id$s", without.as_object().unwrap());

        let with = serde_json::json!({
            "merchantOrderId": "pay-1",
            "paymentStatus": "SUCCESS",
            "signature": signature,
        });
        assert!(verify_signature("key-id$s", with.as_object().unwrap(), &signature));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let payload = serde_json::json!({"merchantOrderId": "pay-1", "paymentStatus": "SUCCESS"});
        let signature = sign_payload("key-id$s", payload.as_object().unwrap());

        let tampered = serde_json::json!({"merchantOrderId": "pay-1", "paymentStatus": "FAILED"});
        assert!(!verify_signature("key-id$s", tampered.as_object().unwrap(), &signature));
    }

    #[test]
    fn only_the_part_after_the_dollar_keys_the_hmac() {
        let payload = serde_json::json!({"a": "1"});
        let map = payload.as_object().unwrap();
        assert_eq!(sign_payload("key-id$sec", map), sign_payload("other$sec", map));
        assert_ne!(sign_payload("key-id$sec", map), sign_payload("key-id$other", map));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let payload = serde_json::json!({"a": "1"});
        assert!(!verify_signature(
            "key-id$s",
            payload.as_object().unwrap(),
            "not-hex"
        ));
    }
}
