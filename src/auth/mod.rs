/*!
 * # Authentication and Authorization
 *
 * JWT bearer authentication for the booking API. User accounts, OTP login,
 * and token issuance live in a separate identity service; this module only
 * verifies tokens and exposes the caller's roles and permissions to handlers.
 * Operator actions on requests are gated by the `requests:manage` permission.
 */

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Well-known permission strings carried in token claims.
pub mod permissions {
    /// Approve, reject, start, and complete requests.
    pub const REQUESTS_MANAGE: &str = "requests:manage";
}

/// Lifetime of tokens minted by [`AuthService::generate_token`].
const TOKEN_TTL_HOURS: i64 = 24;

/// JWT claims. `sub` holds the user id as a UUID string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated caller, extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin() || self.permissions.iter().any(|p| p == permission)
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AuthError::InvalidToken("subject is not a user id".to_string()))?;
        Ok(AuthUser {
            user_id,
            roles: claims.roles,
            permissions: claims.permissions,
        })
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("auth service not configured")]
    Misconfigured,
}

impl AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AuthError::Misconfigured => "an internal error occurred".to_string(),
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "success": false,
            "error": "UNAUTHORIZED",
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

/// Verifies bearer tokens and mints them for trusted callers (tests, local
/// tooling). HS256 with the configured `jwt_secret`.
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        roles: Vec<String>,
        permissions: Vec<String>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            permissions,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ChronoDuration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// Extracts and verifies the bearer token. The router injects
/// `Arc<AuthService>` into request extensions; handlers just declare an
/// `AuthUser` (or `AuthenticatedUser`) parameter.
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = parts
            .extensions
            .get::<Arc<AuthService>>()
            .ok_or(AuthError::Misconfigured)?
            .clone();

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .or_else(|| header_value.strip_prefix("bearer "))
            .ok_or(AuthError::MissingToken)?;

        let claims = auth_service.verify_token(token)?;
        let user = AuthUser::try_from(claims)?;
        debug!(user_id = %user.user_id, "authenticated request");
        Ok(user)
    }
}

/// Alias used in handler signatures.
pub type AuthenticatedUser = AuthUser;

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("a_sufficiently_long_test_secret_value_0123456789")
    }

    #[test]
    fn round_trips_roles_and_permissions() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let token = svc
            .generate_token(
                user_id,
                vec!["operator".into()],
                vec![permissions::REQUESTS_MANAGE.into()],
            )
            .unwrap();

        let claims = svc.verify_token(&token).unwrap();
        let user = AuthUser::try_from(claims).unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(user.has_permission(permissions::REQUESTS_MANAGE));
        assert!(!user.is_admin());
    }

    #[test]
    fn admin_role_implies_every_permission() {
        let svc = service();
        let token = svc
            .generate_token(Uuid::new_v4(), vec!["admin".into()], vec![])
            .unwrap();
        let user = AuthUser::try_from(svc.verify_token(&token).unwrap()).unwrap();
        assert!(user.has_permission(permissions::REQUESTS_MANAGE));
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let svc = service();
        let other = AuthService::new("a_completely_different_secret_value_9876543210");
        let token = other
            .generate_token(Uuid::new_v4(), vec![], vec![])
            .unwrap();
        assert!(matches!(
            svc.verify_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let claims = Claims {
            sub: "not-a-uuid".into(),
            roles: vec![],
            permissions: vec![],
            jti: Uuid::new_v4().to_string(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 3600,
        };
        assert!(AuthUser::try_from(claims).is_err());
    }
}
