//! Verification failure paths: forged signatures, uncaptured payments, and a
//! gateway that stops answering. The transaction must end in the right state
//! for each, and the linked request must never advance.

mod common;

use axum::{body, http::Method, response::Response};
use common::{ScriptedGateway, TestApp};
use cyclehub_api::entities::payment_transaction::Entity as PaymentTransaction;
use cyclehub_api::services::razorpay::GatewayError;
use sea_orm::EntityTrait;
use serde_json::{json, Value};

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// An approved online repair waiting for payment, with an order already
/// minted. Returns `(request_id, order_id)`.
async fn order_for_waiting_repair(app: &TestApp) -> (i64, String) {
    let created = app
        .request_authenticated(
            Method::POST,
            "/api/requests/repair",
            Some(json!({
                "service_items": [{"name": "Chain replacement", "category": "drivetrain", "price": "500"}],
                "payment_method": "online"
            })),
        )
        .await;
    let request_id = response_json(created).await["data"]["id"].as_i64().unwrap();
    app.request_as_operator(
        Method::POST,
        &format!("/api/requests/repair/{}/approve", request_id),
        None,
    )
    .await;

    let order = app
        .request_authenticated(
            Method::POST,
            "/api/payment/create-order",
            Some(json!({"amount": "500", "request_type": "repair", "request_id": request_id})),
        )
        .await;
    assert_eq!(order.status(), 200);
    let order_id = response_json(order).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();
    (request_id, order_id)
}

async fn transaction_status(app: &TestApp, order_id: &str) -> Value {
    let response = app
        .request_authenticated(Method::GET, &format!("/api/payment/status/{}", order_id), None)
        .await;
    assert_eq!(response.status(), 200);
    response_json(response).await
}

async fn request_status(app: &TestApp, request_id: i64) -> Value {
    let response = app
        .request_authenticated(Method::GET, &format!("/api/requests/repair/{}", request_id), None)
        .await;
    response_json(response).await["data"]["status"].clone()
}

// ==================== Forged signatures ====================

#[tokio::test]
async fn a_forged_signature_fails_the_transaction() {
    let app = TestApp::new().await;
    let (request_id, order_id) = order_for_waiting_repair(&app).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/payment/verify",
            Some(json!({
                "razorpay_order_id": order_id,
                "razorpay_payment_id": "pay_forged_1",
                "razorpay_signature": "deadbeef"
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "SECURITY_VIOLATION");

    assert_eq!(transaction_status(&app, &order_id).await["status"], "failed");
    assert_eq!(request_status(&app, request_id).await, "waiting_payment");

    // the failed transaction is dead; even a genuine signature cannot revive it
    let retry = app
        .request_authenticated(
            Method::POST,
            "/api/payment/verify",
            Some(json!({
                "razorpay_order_id": order_id,
                "razorpay_payment_id": "pay_forged_1",
                "razorpay_signature": app.valid_signature(&order_id, "pay_forged_1")
            })),
        )
        .await;
    assert_eq!(retry.status(), 409);
}

#[tokio::test]
async fn the_signature_gate_fires_before_any_gateway_call() {
    let app = TestApp::new().await;
    let (_, order_id) = order_for_waiting_repair(&app).await;

    app.gateway.push_payment(Ok(ScriptedGateway::captured_payment(
        "pay_never_fetched",
        &order_id,
        50_000,
    )));

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/payment/verify",
            Some(json!({
                "razorpay_order_id": order_id,
                "razorpay_payment_id": "pay_never_fetched",
                "razorpay_signature": "not-the-signature"
            })),
        )
        .await;
    assert_eq!(response.status(), 400);

    // the scripted fetch response was never consumed
    assert_eq!(app.gateway.queued_payments(), 1);
}

// ==================== Uncaptured payments ====================

#[tokio::test]
async fn an_uncaptured_payment_is_rejected_and_recoverable() {
    let app = TestApp::new().await;
    let (request_id, order_id) = order_for_waiting_repair(&app).await;

    app.gateway.push_payment(Ok(ScriptedGateway::failed_payment(
        "pay_declined_1",
        "card declined by the issuing bank",
    )));

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/payment/verify",
            Some(json!({
                "razorpay_order_id": order_id,
                "razorpay_payment_id": "pay_declined_1",
                "razorpay_signature": app.valid_signature(&order_id, "pay_declined_1")
            })),
        )
        .await;
    assert_eq!(response.status(), 402);
    let body = response_json(response).await;
    assert_eq!(body["error"], "PAYMENT_NOT_CAPTURED");

    assert_eq!(transaction_status(&app, &order_id).await["status"], "failed");
    assert_eq!(request_status(&app, request_id).await, "waiting_payment");

    // the customer tries again with a fresh order and this one settles
    let order = app
        .request_authenticated(
            Method::POST,
            "/api/payment/create-order",
            Some(json!({"amount": "500", "request_type": "repair", "request_id": request_id})),
        )
        .await;
    assert_eq!(order.status(), 200);
    let retry_order_id = response_json(order).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(retry_order_id, order_id);

    let verified = app
        .request_authenticated(
            Method::POST,
            "/api/payment/verify",
            Some(json!({
                "razorpay_order_id": retry_order_id,
                "razorpay_payment_id": "pay_retry_1",
                "razorpay_signature": app.valid_signature(&retry_order_id, "pay_retry_1")
            })),
        )
        .await;
    assert_eq!(verified.status(), 200);
    assert_eq!(request_status(&app, request_id).await, "active");
}

// ==================== Gateway outages ====================

#[tokio::test]
async fn a_fetch_outage_leaves_the_transaction_retryable() {
    let app = TestApp::new().await;
    let (request_id, order_id) = order_for_waiting_repair(&app).await;

    app.gateway.push_payment(Err(GatewayError::Unreachable(
        "connect timed out".to_string(),
    )));

    let payload = json!({
        "razorpay_order_id": order_id,
        "razorpay_payment_id": "pay_outage_1",
        "razorpay_signature": app.valid_signature(&order_id, "pay_outage_1")
    });
    let response = app
        .request_authenticated(Method::POST, "/api/payment/verify", Some(payload.clone()))
        .await;
    assert_eq!(response.status(), 500);
    let body = response_json(response).await;
    assert_eq!(body["error"], "UPSTREAM_UNAVAILABLE");

    // unlike a failed capture, an outage leaves the transaction pending
    assert_eq!(transaction_status(&app, &order_id).await["status"], "pending");

    // the gateway comes back and the same callback goes through
    let retry = app
        .request_authenticated(Method::POST, "/api/payment/verify", Some(payload))
        .await;
    assert_eq!(retry.status(), 200);
    assert_eq!(response_json(retry).await["status"], "completed");
    assert_eq!(request_status(&app, request_id).await, "active");
}

#[tokio::test]
async fn an_order_outage_records_nothing() {
    let app = TestApp::new().await;

    app.gateway.push_order(Err(GatewayError::Api {
        code: "SERVER_ERROR".to_string(),
        description: "order service unavailable".to_string(),
    }));

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/payment/create-order",
            Some(json!({"amount": "150", "request_type": "repair"})),
        )
        .await;
    assert_eq!(response.status(), 500);
    assert_eq!(response_json(response).await["error"], "UPSTREAM_UNAVAILABLE");

    let rows = PaymentTransaction::find()
        .all(app.state.db.as_ref())
        .await
        .expect("query transactions");
    assert!(rows.is_empty());
}
