use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtKeys,
        password::{hash_password, verify_password},
    },
    error::{AppError, AppResult},
    notify::{dispatch, Notification},
    state::AppState,
    users::repo_types::User,
    validation::{normalize_email, validate_password},
};

const RESET_TOKEN_LEN: usize = 32;

pub struct LoginOutcome {
    pub user: User,
    pub token: String,
}

/// Check credentials and issue a bearer token.
///
/// Unknown email is `NotFound`, a wrong password is `InvalidCredentials`.
#[instrument(skip_all)]
pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<LoginOutcome> {
    let email = normalize_email(email);
    let user = state
        .store
        .find_by_email(&email)
        .await?
        .ok_or(AppError::NotFound)?;

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let token = state.keys.sign(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(LoginOutcome { user, token })
}

/// Tokens are self-contained; there is nothing to revoke server-side.
pub fn logout() {
    debug!("logout acknowledged");
}

/// Start a password reset. Silently succeeds for unknown addresses so the
/// endpoint cannot be used to probe for accounts.
#[instrument(skip_all)]
pub async fn reset_password(state: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email);
    let token = generate_reset_token();
    let expires_at = OffsetDateTime::now_utc() + state.config.reset_token_ttl();

    let known = state
        .store
        .set_reset_token(&email, &hash_reset_token(&token), expires_at)
        .await?;
    if !known {
        debug!("password reset requested for unknown email");
        return Ok(());
    }

    info!("password reset token issued");
    dispatch(
        state.notifier.clone(),
        Notification::PasswordReset {
            email,
            token,
            expires_at,
        },
    );
    Ok(())
}

/// Finish a reset: the token must match, be unexpired, and is consumed.
#[instrument(skip_all)]
pub async fn confirm_password_reset(
    state: &AppState,
    token: &str,
    new_password: &str,
) -> AppResult<()> {
    validate_password(new_password)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::InvalidToken);
    }

    let password_hash = hash_password(new_password)?;
    let consumed = state
        .store
        .consume_reset_token(&hash_reset_token(token), &password_hash, OffsetDateTime::now_utc())
        .await?;
    if !consumed {
        warn!("reset token unknown, used or expired");
        return Err(AppError::InvalidToken);
    }

    info!("password reset completed");
    Ok(())
}

/// Resolve a bearer token to the user id it was issued for.
pub fn verify_token(keys: &JwtKeys, token: &str) -> AppResult<Uuid> {
    keys.verify(token).map(|claims| claims.sub)
}

fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn hash_reset_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
