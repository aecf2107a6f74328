use std::{fmt, ops::RangeInclusive, str::FromStr, time::Duration};

use serde::Deserialize;

/// One year.
pub const JWT_TTL_MINUTES: RangeInclusive<i64> = 1..=60 * 24 * 365;
/// One week.
pub const RESET_TOKEN_TTL_MINUTES: RangeInclusive<i64> = 1..=60 * 24 * 7;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Outbound mail relay. Absent when `SMTP_HOST` is unset.
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub use_tls: bool,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

impl SmtpConfig {
    fn from_env() -> anyhow::Result<Option<Self>> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            host,
            port: env_or("SMTP_PORT", 587),
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: std::env::var("SMTP_FROM")
                .map_err(|_| anyhow::anyhow!("SMTP_FROM must be set when SMTP_HOST is"))?,
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub reset_token_ttl_minutes: i64,
    pub request_timeout_secs: u64,
    pub smtp: Option<SmtpConfig>,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userdesk".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userdesk-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
        };
        if jwt.secret.len() < 16 {
            anyhow::bail!("JWT_SECRET must be at least 16 bytes");
        }

        let config = Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            db_timeout_secs: env_or("DB_TIMEOUT_SECS", 5),
            jwt,
            reset_token_ttl_minutes: env_or("RESET_TOKEN_TTL_MINUTES", 60),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 15),
            smtp: SmtpConfig::from_env()?,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would overflow or produce already-expired tokens.
    pub fn validate(&self) -> anyhow::Result<()> {
        check_range("JWT_TTL_MINUTES", self.jwt.ttl_minutes, &JWT_TTL_MINUTES)?;
        check_range(
            "RESET_TOKEN_TTL_MINUTES",
            self.reset_token_ttl_minutes,
            &RESET_TOKEN_TTL_MINUTES,
        )?;
        Ok(())
    }

    pub fn reset_token_ttl(&self) -> time::Duration {
        let minutes = self
            .reset_token_ttl_minutes
            .clamp(*RESET_TOKEN_TTL_MINUTES.start(), *RESET_TOKEN_TTL_MINUTES.end());
        time::Duration::minutes(minutes)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn check_range(key: &str, value: i64, range: &RangeInclusive<i64>) -> anyhow::Result<()> {
    if !range.contains(&value) {
        anyhow::bail!(
            "{key} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

/// Parse an optional variable, falling back when it is unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
