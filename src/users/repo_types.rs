use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,                                // normalised, unique
    pub name: String,
    pub password_hash: String,                        // Argon2 PHC string
    pub reset_token_hash: Option<String>,             // sha256 hex of the outstanding reset token
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Validated input for a new row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Columns a partial update may touch. Anything else is unrepresentable.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.name.is_none() && self.password_hash.is_none()
    }

    pub(crate) fn apply(self, user: &mut User) {
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(hash) = self.password_hash {
            user.password_hash = hash;
        }
    }
}
