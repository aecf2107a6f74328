use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtKeys, services::verify_token},
    error::AppError,
};

/// Extracts and validates the bearer JWT, yielding the caller's user ID.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::MissingToken)?;

        // Expect "Bearer <token>"
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::MissingToken)?;

        let user_id = verify_token(&JwtKeys::from_ref(state), token).map_err(|e| {
            warn!(error = %e, "rejected bearer token");
            e
        })?;

        Ok(AuthUser(user_id))
    }
}
