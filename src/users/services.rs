use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::password::hash_password,
    error::{AppError, AppResult},
    notify::{dispatch, Notification},
    state::AppState,
    users::{
        dto::{CreateUserRequest, UpdateUserRequest},
        repo_types::{NewUser, User, UserPatch},
    },
    validation::{validate_email, validate_name, validate_password},
};

const MAX_SEARCH_LIMIT: i64 = 100;

#[instrument(skip(state, input), fields(email = %input.email))]
pub async fn create_user(state: &AppState, input: CreateUserRequest) -> AppResult<User> {
    let email = validate_email(&input.email)?;
    let name = validate_name(&input.name)?;
    validate_password(&input.password)?;

    if state.store.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AppError::DuplicateEmail);
    }

    let password_hash = hash_password(&input.password)?;
    // the unique index still guards the race between the check and the insert
    let user = state
        .store
        .insert(NewUser {
            email,
            name,
            password_hash,
        })
        .await?;
    info!(user_id = %user.id, "user created");

    dispatch(
        state.notifier.clone(),
        Notification::Welcome {
            email: user.email.clone(),
            name: user.name.clone(),
        },
    );

    Ok(user)
}

pub async fn get_user_by_id(state: &AppState, id: Uuid) -> AppResult<User> {
    state.store.find_by_id(id).await?.ok_or(AppError::NotFound)
}

/// Substring search. A blank query matches nothing.
pub async fn search_users(
    state: &AppState,
    query: &str,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<User>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
    let offset = offset.max(0);
    state.store.search(query, limit, offset).await
}

#[instrument(skip(state, input))]
pub async fn update_user(state: &AppState, id: Uuid, input: UpdateUserRequest) -> AppResult<User> {
    let patch = UserPatch {
        email: input.email.as_deref().map(validate_email).transpose()?,
        name: input.name.as_deref().map(validate_name).transpose()?,
        password_hash: match input.password.as_deref() {
            Some(plain) => {
                validate_password(plain)?;
                Some(hash_password(plain)?)
            }
            None => None,
        },
    };
    if patch.is_empty() {
        return Err(AppError::validation("no updatable fields supplied"));
    }

    let user = state.store.update(id, patch).await?.ok_or(AppError::NotFound)?;
    info!(user_id = %user.id, "user updated");
    Ok(user)
}

/// Idempotent: deleting an absent user succeeds.
pub async fn delete_user(state: &AppState, id: Uuid) -> AppResult<()> {
    let removed = state.store.delete(id).await?;
    info!(user_id = %id, removed, "user delete requested");
    Ok(())
}
