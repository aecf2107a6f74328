use std::{future::Future, time::Duration};

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::users::repo_types::{NewUser, User, UserPatch};

const USER_COLUMNS: &str = "id, email, name, password_hash, reset_token_hash, \
                            reset_token_expires_at, created_at, updated_at";

/// Persistence seam for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. A taken email yields `DuplicateEmail`.
    async fn insert(&self, new: NewUser) -> AppResult<User>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// Case-insensitive substring match on name or email.
    async fn search(&self, query: &str, limit: i64, offset: i64) -> AppResult<Vec<User>>;

    /// Apply a patch atomically. `Ok(None)` when the id does not exist.
    async fn update(&self, id: Uuid, patch: UserPatch) -> AppResult<Option<User>>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> AppResult<bool>;

    /// Store a reset token hash for the user owning `email`. Returns whether
    /// such a user exists.
    async fn set_reset_token(
        &self,
        email: &str,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<bool>;

    /// Swap in a new password hash and clear the reset token, provided the
    /// token matches and has not expired at `now`.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> AppResult<bool>;

    /// Release underlying resources.
    async fn close(&self) {}
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
    timeout: Duration,
}

impl PgUserStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn timed<T, E, F>(&self, op: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, E>> + Send,
        E: Into<AppError>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(Into::into),
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "database call timed out");
                Err(AppError::Database(format!("{op} timed out")))
            }
        }
    }
}

/// Escape LIKE metacharacters so user input only ever matches literally.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, new: NewUser) -> AppResult<User> {
        let sql = format!(
            "INSERT INTO users (id, email, name, password_hash) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        self.timed(
            "insert user",
            sqlx::query_as::<_, User>(&sql)
                .bind(Uuid::new_v4())
                .bind(&new.email)
                .bind(&new.name)
                .bind(&new.password_hash)
                .fetch_one(&self.db),
        )
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.timed(
            "find user by id",
            sqlx::query_as::<_, User>(&sql).bind(id).fetch_optional(&self.db),
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        self.timed(
            "find user by email",
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_optional(&self.db),
        )
        .await
    }

    async fn search(&self, query: &str, limit: i64, offset: i64) -> AppResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE name ILIKE $1 ESCAPE '\' OR email ILIKE $1 ESCAPE '\'
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        );
        self.timed(
            "search users",
            sqlx::query_as::<_, User>(&sql)
                .bind(like_pattern(query))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.db),
        )
        .await
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> AppResult<Option<User>> {
        self.timed("update user", async {
            let mut tx = self.db.begin().await?;

            let select = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
            let Some(mut user) = sqlx::query_as::<_, User>(&select)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            else {
                return Ok::<_, AppError>(None);
            };

            if let Some(email) = patch.email.as_deref() {
                if email != user.email {
                    let (taken,) = sqlx::query_as::<_, (bool,)>(
                        "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id <> $2)",
                    )
                    .bind(email)
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
                    if taken {
                        return Err(AppError::DuplicateEmail);
                    }
                }
            }

            patch.apply(&mut user);
            let update = format!(
                "UPDATE users SET email = $2, name = $3, password_hash = $4, updated_at = now() \
                 WHERE id = $1 \
                 RETURNING {USER_COLUMNS}"
            );
            let updated = sqlx::query_as::<_, User>(&update)
                .bind(id)
                .bind(&user.email)
                .bind(&user.name)
                .bind(&user.password_hash)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(Some(updated))
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let res = self
            .timed(
                "delete user",
                sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(id)
                    .execute(&self.db),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_reset_token(
        &self,
        email: &str,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<bool> {
        let res = self
            .timed(
                "set reset token",
                sqlx::query(
                    r#"
                    UPDATE users
                       SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = now()
                     WHERE email = $1
                    "#,
                )
                .bind(email)
                .bind(token_hash)
                .bind(expires_at)
                .execute(&self.db),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> AppResult<bool> {
        let res = self
            .timed(
                "consume reset token",
                sqlx::query(
                    r#"
                    UPDATE users
                       SET password_hash = $2,
                           reset_token_hash = NULL,
                           reset_token_expires_at = NULL,
                           updated_at = now()
                     WHERE reset_token_hash = $1
                       AND reset_token_expires_at > $3
                    "#,
                )
                .bind(token_hash)
                .bind(password_hash)
                .bind(now)
                .execute(&self.db),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
