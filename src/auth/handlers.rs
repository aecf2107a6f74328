use axum::{extract::State, routing::post, Router};
use tracing::instrument;

use crate::{
    auth::{
        dto::{ConfirmResetRequest, LoginRequest, LoginResponse, ResetPasswordRequest},
        services,
    },
    error::{AppError, AppResult},
    response::{ApiJson, ApiResponse, MessageResponse},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/reset-password/confirm", post(confirm_reset))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<ApiResponse<LoginResponse>> {
    // unknown email and wrong password look the same from outside
    let outcome = services::login(&state, &payload.email, &payload.password)
        .await
        .map_err(|e| match e {
            AppError::NotFound => AppError::InvalidCredentials,
            other => other,
        })?;

    Ok(ApiResponse::ok(LoginResponse {
        user: outcome.user.into(),
        token: outcome.token,
    }))
}

pub async fn logout() -> ApiResponse<MessageResponse> {
    services::logout();
    ApiResponse::ok(MessageResponse::new("Logged out"))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> AppResult<ApiResponse<MessageResponse>> {
    services::reset_password(&state, &payload.email).await?;
    Ok(ApiResponse::ok(MessageResponse::new(
        "If the address is registered, a reset link has been sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn confirm_reset(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ConfirmResetRequest>,
) -> AppResult<ApiResponse<MessageResponse>> {
    services::confirm_password_reset(&state, &payload.token, &payload.password).await?;
    Ok(ApiResponse::ok(MessageResponse::new("Password updated")))
}
