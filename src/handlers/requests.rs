use crate::auth::{permissions, AuthenticatedUser};
use crate::entities::enums::RequestType;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::lifecycle::{CreateRepairRequest, CreateRentalRequest, RequestRecord};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;

fn parse_request_type(raw: &str) -> Result<RequestType, ServiceError> {
    match raw.to_ascii_lowercase().as_str() {
        "repair" => Ok(RequestType::Repair),
        "rental" => Ok(RequestType::Rental),
        other => Err(ServiceError::ValidationError(format!(
            "unknown request type: {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectRequestBody {
    /// Reason shown to the user; must not be empty.
    #[schema(example = "frame is beyond repair")]
    pub note: String,
}

/// Create a repair request
#[utoipa::path(
    post,
    path = "/api/requests/repair",
    request_body = CreateRepairRequest,
    responses(
        (status = 201, description = "Repair request created", body = crate::ApiResponse<RequestRecord>),
        (status = 400, description = "Invalid items or coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn create_repair_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRepairRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RequestRecord>>), ServiceError> {
    let record = state
        .services
        .lifecycle
        .create_repair(user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(record))))
}

/// Create a rental request
#[utoipa::path(
    post,
    path = "/api/requests/rental",
    request_body = CreateRentalRequest,
    responses(
        (status = 201, description = "Rental request created", body = crate::ApiResponse<RequestRecord>),
        (status = 400, description = "Invalid rental terms or coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn create_rental_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRentalRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RequestRecord>>), ServiceError> {
    let record = state
        .services
        .lifecycle
        .create_rental(user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(record))))
}

/// List the caller's requests
#[utoipa::path(
    get,
    path = "/api/requests",
    responses(
        (status = 200, description = "Repair and rental requests, newest first", body = crate::ApiResponse<Vec<RequestRecord>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn list_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<Vec<RequestRecord>>>, ServiceError> {
    let records = state.services.lifecycle.list_for_user(user.user_id).await?;
    Ok(Json(ApiResponse::success(records)))
}

/// Get one request
#[utoipa::path(
    get,
    path = "/api/requests/{request_type}/{id}",
    params(
        ("request_type" = String, Path, description = "repair or rental"),
        ("id" = i64, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Request details", body = crate::ApiResponse<RequestRecord>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn get_request(
    State(state): State<AppState>,
    Path((request_type, id)): Path<(String, i64)>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<RequestRecord>>, ServiceError> {
    let request_type = parse_request_type(&request_type)?;

    // Operators may inspect any request; everyone else only their own.
    let record = if user.has_permission(permissions::REQUESTS_MANAGE) {
        state.services.lifecycle.get_request(request_type, id).await?
    } else {
        state
            .services
            .lifecycle
            .get_owned_request(user.user_id, request_type, id)
            .await?
    };
    Ok(Json(ApiResponse::success(record)))
}

/// Approve a pending request
#[utoipa::path(
    post,
    path = "/api/requests/{request_type}/{id}/approve",
    params(
        ("request_type" = String, Path, description = "repair or rental"),
        ("id" = i64, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Request approved", body = crate::ApiResponse<RequestRecord>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Request is not pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn approve_request(
    State(state): State<AppState>,
    Path((request_type, id)): Path<(String, i64)>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<RequestRecord>>, ServiceError> {
    // Check permissions
    if !user.has_permission(permissions::REQUESTS_MANAGE) {
        return Err(ServiceError::Forbidden(
            "insufficient permissions to manage requests".to_string(),
        ));
    }

    let request_type = parse_request_type(&request_type)?;
    let record = state.services.lifecycle.approve(request_type, id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Reject a pending request
#[utoipa::path(
    post,
    path = "/api/requests/{request_type}/{id}/reject",
    params(
        ("request_type" = String, Path, description = "repair or rental"),
        ("id" = i64, Path, description = "Request ID")
    ),
    request_body = RejectRequestBody,
    responses(
        (status = 200, description = "Request rejected", body = crate::ApiResponse<RequestRecord>),
        (status = 400, description = "Missing rejection note", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Request is not pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn reject_request(
    State(state): State<AppState>,
    Path((request_type, id)): Path<(String, i64)>,
    user: AuthenticatedUser,
    Json(body): Json<RejectRequestBody>,
) -> Result<Json<ApiResponse<RequestRecord>>, ServiceError> {
    // Check permissions
    if !user.has_permission(permissions::REQUESTS_MANAGE) {
        return Err(ServiceError::Forbidden(
            "insufficient permissions to manage requests".to_string(),
        ));
    }

    let request_type = parse_request_type(&request_type)?;
    let record = state
        .services
        .lifecycle
        .reject(request_type, id, &body.note)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Start a rental after delivery
#[utoipa::path(
    post,
    path = "/api/requests/{request_type}/{id}/start",
    params(
        ("request_type" = String, Path, description = "repair or rental"),
        ("id" = i64, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Rental started", body = crate::ApiResponse<RequestRecord>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Request is not awaiting delivery", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn start_request(
    State(state): State<AppState>,
    Path((request_type, id)): Path<(String, i64)>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<RequestRecord>>, ServiceError> {
    // Check permissions
    if !user.has_permission(permissions::REQUESTS_MANAGE) {
        return Err(ServiceError::Forbidden(
            "insufficient permissions to manage requests".to_string(),
        ));
    }

    let request_type = parse_request_type(&request_type)?;
    let record = state
        .services
        .lifecycle
        .start_rental(request_type, id)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Complete an in-progress request
#[utoipa::path(
    post,
    path = "/api/requests/{request_type}/{id}/complete",
    params(
        ("request_type" = String, Path, description = "repair or rental"),
        ("id" = i64, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Request completed", body = crate::ApiResponse<RequestRecord>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Request is not in progress", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
async fn complete_request(
    State(state): State<AppState>,
    Path((request_type, id)): Path<(String, i64)>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<RequestRecord>>, ServiceError> {
    // Check permissions
    if !user.has_permission(permissions::REQUESTS_MANAGE) {
        return Err(ServiceError::Forbidden(
            "insufficient permissions to manage requests".to_string(),
        ));
    }

    let request_type = parse_request_type(&request_type)?;
    let record = state.services.lifecycle.complete(request_type, id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Request routes
pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/repair", post(create_repair_request))
        .route("/rental", post(create_rental_request))
        .route("/", get(list_requests))
        .route("/:request_type/:id", get(get_request))
        .route("/:request_type/:id/approve", post(approve_request))
        .route("/:request_type/:id/reject", post(reject_request))
        .route("/:request_type/:id/start", post(start_request))
        .route("/:request_type/:id/complete", post(complete_request))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_type_parsing_is_case_insensitive() {
        assert_eq!(parse_request_type("repair").unwrap(), RequestType::Repair);
        assert_eq!(parse_request_type("Rental").unwrap(), RequestType::Rental);
    }

    #[test]
    fn unknown_request_types_are_rejected() {
        assert!(matches!(
            parse_request_type("purchase"),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
