use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, AppResult};

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 255;
// argon2 cost grows with input; cap it
const MAX_PASSWORD_LEN: usize = 128;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

/// Normalise and check an email, returning the stored form.
pub fn validate_email(email: &str) -> AppResult<String> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AppError::validation("invalid email"));
    }
    Ok(email)
}

pub fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::validation("name is too long"));
    }
    Ok(name.to_string())
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.is_empty() {
        return Err(AppError::validation("password must not be empty"));
    }
    if password.chars().count() > MAX_PASSWORD_LEN {
        return Err(AppError::validation("password is too long"));
    }
    Ok(())
}
