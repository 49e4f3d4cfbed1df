use crate::auth::AuthenticatedUser;
use crate::entities::enums::RequestType;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::coupons::CouponDiscount;
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

/// The mobile clients send this shape camelCase; keep it that way.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    #[schema(example = "SAVE10")]
    pub code: String,
    pub request_type: RequestType,
    /// Item-category tags of the order being priced.
    #[schema(example = json!(["mountain", "gears"]))]
    pub items: Vec<String>,
    #[schema(example = "1000")]
    pub total_amount: Decimal,
}

/// Preview a coupon against an order
#[utoipa::path(
    post,
    path = "/api/coupon/apply",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applies; discount computed", body = CouponDiscount),
        (status = 400, description = "Coupon rejected, with the reason", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
async fn apply_coupon(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<Json<CouponDiscount>, ServiceError> {
    let discount = state
        .services
        .coupons
        .apply(
            &payload.code,
            payload.request_type,
            &payload.items,
            payload.total_amount,
        )
        .await?;
    Ok(Json(discount))
}

/// Coupon routes
pub fn coupon_routes() -> Router<AppState> {
    Router::new().route("/apply", post(apply_coupon))
}
