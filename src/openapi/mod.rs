use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CycleHub API",
        version = "1.0.0",
        description = r#"
# CycleHub Booking API

Repair and rental bookings for the CycleHub bicycle service: request intake,
operator approval, online payment via Razorpay, and coupon pricing.

## Authentication

All `/api` endpoints require a JWT bearer token issued by the identity
service:

```
Authorization: Bearer <your-jwt-token>
```

Operator actions (approve, reject, start, complete) additionally require the
`requests:manage` permission.

## Error Handling

Errors use a consistent JSON envelope with appropriate HTTP status codes:

```json
{
  "success": false,
  "error": "CONFLICT",
  "message": "request has already been paid",
  "timestamp": "2025-01-01T00:00:00Z"
}
```
        "#,
        contact(
            name = "CycleHub Support",
            email = "support@cyclehub.in"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "https://api.cyclehub.in", description = "Production server"),
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Requests", description = "Repair and rental request lifecycle"),
        (name = "Payments", description = "Gateway orders and payment verification"),
        (name = "Coupons", description = "Discount evaluation")
    ),
    paths(
        // Requests
        crate::handlers::requests::create_repair_request,
        crate::handlers::requests::create_rental_request,
        crate::handlers::requests::list_requests,
        crate::handlers::requests::get_request,
        crate::handlers::requests::approve_request,
        crate::handlers::requests::reject_request,
        crate::handlers::requests::start_request,
        crate::handlers::requests::complete_request,

        // Payments
        crate::handlers::payments::create_order,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::payment_status,

        // Coupons
        crate::handlers::coupons::apply_coupon,

        // Health, status, and metrics intentionally omitted
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::errors::ErrorResponse,

            // Shared enums
            crate::entities::enums::RequestStatus,
            crate::entities::enums::RequestType,
            crate::entities::enums::PaymentMethod,
            crate::entities::enums::TransactionStatus,
            crate::entities::enums::DiscountType,

            // Request types
            crate::entities::repair_request::ServiceItem,
            crate::services::lifecycle::RequestRecord,
            crate::services::lifecycle::CreateRepairRequest,
            crate::services::lifecycle::CreateRentalRequest,
            crate::handlers::requests::RejectRequestBody,

            // Payment types
            crate::services::payments::CreateOrderRequest,
            crate::services::payments::CreateOrderResponse,
            crate::services::payments::VerifyPaymentRequest,
            crate::services::payments::VerifyPaymentResponse,
            crate::services::payments::TransactionStatusResponse,

            // Coupon types
            crate::handlers::coupons::ApplyCouponRequest,
            crate::services::coupons::CouponDiscount
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
