use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    error::AppResult,
    response::{ApiJson, ApiPath, ApiQuery, ApiResponse},
    state::AppState,
    users::{
        dto::{CreateUserRequest, PublicUser, SearchParams, UpdateUserRequest},
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/search", get(search_users))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

/// POST /users
#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> AppResult<(StatusCode, ApiResponse<PublicUser>)> {
    let user = services::create_user(&state, payload).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(user.into())))
}

/// GET /users/search?query=&limit=&offset=
#[instrument(skip(state, params))]
pub async fn search_users(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> AppResult<ApiResponse<Vec<PublicUser>>> {
    let users = services::search_users(&state, &params.query, params.limit, params.offset).await?;
    Ok(ApiResponse::ok(users.into_iter().map(PublicUser::from).collect()))
}

/// GET /users/:id
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = services::get_user_by_id(&state, id).await?;
    Ok(ApiResponse::ok(user.into()))
}

/// PATCH /users/:id
#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = services::update_user(&state, id, payload).await?;
    Ok(ApiResponse::ok(user.into()))
}

/// DELETE /users/:id
#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<ApiResponse<()>> {
    services::delete_user(&state, id).await?;
    Ok(ApiResponse::empty())
}
