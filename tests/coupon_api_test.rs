//! Tests for the coupon preview endpoint and for coupons applied at request
//! creation. The preview endpoint speaks camelCase because the mobile clients
//! already do.

mod common;

use axum::{body, http::Method, response::Response};
use chrono::{Duration, Utc};
use common::TestApp;
use cyclehub_api::entities::coupon;
use cyclehub_api::entities::enums::{CouponScope, DiscountType};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal fields serialize as strings")
        .parse()
        .expect("decimal parses")
}

fn apply_payload(code: &str, request_type: &str, items: Vec<&str>, total: &str) -> Value {
    json!({
        "code": code,
        "requestType": request_type,
        "items": items,
        "totalAmount": total
    })
}

async fn apply(app: &TestApp, payload: Value) -> Response {
    app.request_authenticated(Method::POST, "/api/coupon/apply", Some(payload))
        .await
}

// ==================== Successful application ====================

#[tokio::test]
async fn ten_percent_of_a_thousand_is_one_hundred_and_never_stacks() {
    let app = TestApp::new().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10), CouponScope::Any)
        .await;

    let response = apply(&app, apply_payload("SAVE10", "repair", vec!["brakes"], "1000")).await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["code"], "SAVE10");
    assert_eq!(decimal_field(&body["discount"]), Decimal::from(100));
    assert_eq!(body["discountType"], "percentage");
    assert_eq!(decimal_field(&body["discountValue"]), Decimal::from(10));

    // the same preview again computes the same discount from scratch
    let again = apply(&app, apply_payload("SAVE10", "repair", vec!["brakes"], "1000")).await;
    assert_eq!(again.status(), 200);
    assert_eq!(
        decimal_field(&response_json(again).await["discount"]),
        Decimal::from(100)
    );
}

#[tokio::test]
async fn fixed_discounts_clamp_to_the_order_total() {
    let app = TestApp::new().await;
    app.seed_coupon("FLAT200", DiscountType::Fixed, Decimal::from(200), CouponScope::Any)
        .await;

    let response = apply(&app, apply_payload("FLAT200", "rental", vec!["city"], "150")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        decimal_field(&response_json(response).await["discount"]),
        Decimal::from(150)
    );
}

#[tokio::test]
async fn coupon_codes_are_trimmed_before_lookup() {
    let app = TestApp::new().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10), CouponScope::Any)
        .await;

    let response = apply(&app, apply_payload("  SAVE10  ", "repair", vec!["gears"], "200")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await["code"], "SAVE10");
}

// ==================== Rejections ====================

#[tokio::test]
async fn unknown_codes_are_rejected_with_the_reason() {
    let app = TestApp::new().await;

    let response = apply(&app, apply_payload("NOPE", "repair", vec!["brakes"], "500")).await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "COUPON_REJECTED");
    assert_eq!(body["message"], "coupon code not found");
}

#[tokio::test]
async fn inactive_coupons_are_rejected() {
    let app = TestApp::new().await;
    coupon::ActiveModel {
        code: Set("RETIRED".to_string()),
        discount_type: Set(DiscountType::Fixed),
        discount_value: Set(Decimal::from(50)),
        applies_to: Set(CouponScope::Any),
        active: Set(false),
        ..Default::default()
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();

    let response = apply(&app, apply_payload("RETIRED", "repair", vec!["brakes"], "500")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["message"], "coupon is not active");
}

#[tokio::test]
async fn the_validity_window_is_enforced() {
    let app = TestApp::new().await;
    coupon::ActiveModel {
        code: Set("TOOLATE".to_string()),
        discount_type: Set(DiscountType::Fixed),
        discount_value: Set(Decimal::from(50)),
        applies_to: Set(CouponScope::Any),
        active: Set(true),
        valid_until: Set(Some(Utc::now() - Duration::days(1))),
        ..Default::default()
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();
    coupon::ActiveModel {
        code: Set("TOOSOON".to_string()),
        discount_type: Set(DiscountType::Fixed),
        discount_value: Set(Decimal::from(50)),
        applies_to: Set(CouponScope::Any),
        active: Set(true),
        valid_from: Set(Some(Utc::now() + Duration::days(1))),
        ..Default::default()
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();

    let response = apply(&app, apply_payload("TOOLATE", "repair", vec!["brakes"], "500")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["message"], "coupon has expired");

    let response = apply(&app, apply_payload("TOOSOON", "repair", vec!["brakes"], "500")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["message"], "coupon is not valid yet");
}

#[tokio::test]
async fn scope_minimum_and_categories_gate_the_discount() {
    let app = TestApp::new().await;
    app.seed_coupon(
        "RENTALONLY",
        DiscountType::Percentage,
        Decimal::from(15),
        CouponScope::Rental,
    )
    .await;
    coupon::ActiveModel {
        code: Set("BIG10".to_string()),
        discount_type: Set(DiscountType::Percentage),
        discount_value: Set(Decimal::from(10)),
        applies_to: Set(CouponScope::Any),
        min_amount: Set(Some(Decimal::from(500))),
        active: Set(true),
        ..Default::default()
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();
    coupon::ActiveModel {
        code: Set("EBIKE5".to_string()),
        discount_type: Set(DiscountType::Percentage),
        discount_value: Set(Decimal::from(5)),
        applies_to: Set(CouponScope::Any),
        applicable_categories: Set(Some(json!(["e-bike"]))),
        active: Set(true),
        ..Default::default()
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();

    let response = apply(&app, apply_payload("RENTALONLY", "repair", vec!["brakes"], "500")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        response_json(response).await["message"],
        "coupon does not apply to this request type"
    );

    let response = apply(&app, apply_payload("BIG10", "repair", vec!["brakes"], "400")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        response_json(response).await["message"],
        "order total is below the coupon minimum of 500"
    );

    let response = apply(&app, apply_payload("EBIKE5", "rental", vec!["city"], "300")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        response_json(response).await["message"],
        "no items in this request are eligible for the coupon"
    );
}

#[tokio::test]
async fn the_preview_validates_its_input() {
    let app = TestApp::new().await;

    let response = apply(&app, apply_payload("", "repair", vec!["brakes"], "500")).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["error"], "VALIDATION_ERROR");

    let response = apply(&app, apply_payload("X", "repair", vec![], "500")).await;
    assert_eq!(response.status(), 400);

    let response = apply(&app, apply_payload("X", "repair", vec!["brakes"], "0")).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn previews_require_authentication() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/coupon/apply",
            Some(apply_payload("SAVE10", "repair", vec!["brakes"], "500")),
            None,
        )
        .await;
    assert_eq!(response.status(), 401);
}

// ==================== Coupons at creation time ====================

#[tokio::test]
async fn a_coupon_at_creation_discounts_the_stored_total() {
    let app = TestApp::new().await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10), CouponScope::Any)
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/requests/repair",
            Some(json!({
                "service_items": [
                    {"name": "Brake pad replacement", "category": "brakes", "price": "300"},
                    {"name": "Gear tuning", "category": "gears", "price": "200"}
                ],
                "payment_method": "online",
                "coupon_code": "SAVE10"
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let data = response_json(response).await["data"].take();
    assert_eq!(decimal_field(&data["total_amount"]), Decimal::from(450));
    assert_eq!(data["coupon_code"], "SAVE10");
}

#[tokio::test]
async fn rental_coupons_match_on_the_bicycle_category() {
    let app = TestApp::new().await;
    coupon::ActiveModel {
        code: Set("EBIKE5".to_string()),
        discount_type: Set(DiscountType::Percentage),
        discount_value: Set(Decimal::from(5)),
        applies_to: Set(CouponScope::Rental),
        applicable_categories: Set(Some(json!(["e-bike"]))),
        active: Set(true),
        ..Default::default()
    }
    .insert(app.state.db.as_ref())
    .await
    .unwrap();

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/requests/rental",
            Some(json!({
                "bicycle_id": 3,
                "bicycle_category": "e-bike",
                "daily_rate": "100",
                "duration_days": 4,
                "payment_method": "offline",
                "coupon_code": "EBIKE5"
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let data = response_json(response).await["data"].take();
    // 5% off 400
    assert_eq!(decimal_field(&data["total_amount"]), Decimal::from(380));
}

#[tokio::test]
async fn a_rejected_coupon_blocks_the_creation() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/requests/repair",
            Some(json!({
                "service_items": [{"name": "Tune-up", "category": "general", "price": "400"}],
                "payment_method": "offline",
                "coupon_code": "GHOST"
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["error"], "COUPON_REJECTED");

    // nothing was persisted
    let list = app.request_authenticated(Method::GET, "/api/requests", None).await;
    let items = response_json(list).await["data"].take();
    assert_eq!(items.as_array().unwrap().len(), 0);
}
