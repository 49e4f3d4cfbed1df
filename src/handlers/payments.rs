use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{
    CreateOrderRequest, CreateOrderResponse, TransactionStatusResponse, VerifyPaymentRequest,
    VerifyPaymentResponse,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};

// Payment endpoints return the bare shapes below rather than the standard
// envelope; mobile clients consume them verbatim.

/// Create a gateway order
#[utoipa::path(
    post,
    path = "/api/payment/create-order",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created at the gateway", body = CreateOrderResponse),
        (status = 400, description = "Bad amount or unpayable request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Request already paid", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, ServiceError> {
    let response = state
        .services
        .payments
        .create_order(user.user_id, payload)
        .await?;
    Ok(Json(response))
}

/// Verify a completed checkout
#[utoipa::path(
    post,
    path = "/api/payment/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified and settled", body = VerifyPaymentResponse),
        (status = 400, description = "Signature mismatch", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment not captured", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transaction already settled", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ServiceError> {
    let response = state.services.payments.verify(user.user_id, payload).await?;
    Ok(Json(response))
}

/// Get a transaction by gateway order id
#[utoipa::path(
    get,
    path = "/api/payment/status/{order_id}",
    params(
        ("order_id" = String, Path, description = "Gateway order ID")
    ),
    responses(
        (status = 200, description = "Transaction snapshot", body = TransactionStatusResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<TransactionStatusResponse>, ServiceError> {
    let response = state
        .services
        .payments
        .get_status(user.user_id, &order_id)
        .await?;
    Ok(Json(response))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-order", post(create_order))
        .route("/verify", post(verify_payment))
        .route("/status/:order_id", get(payment_status))
}
