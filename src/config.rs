// src/config.rs

use std::env;

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    /// Access token lifetime in seconds.
    pub access_token_ttl: u64,
    /// Refresh token and session lifetime in seconds.
    pub refresh_token_ttl: u64,
    /// Slack (seconds) past the exam duration before an attempt counts as expired.
    pub submission_grace: u64,
    /// Seconds between revocation-list / session sweeps.
    pub purge_interval: u64,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let jwt_refresh_secret = required("JWT_REFRESH_SECRET")?;

        let access_token_ttl = duration_var("ACCESS_TOKEN_EXPIRY", "1h")?;
        let refresh_token_ttl = duration_var("REFRESH_TOKEN_EXPIRY", "7d")?;
        let submission_grace = duration_var("SUBMISSION_GRACE", "30s")?;
        let purge_interval = duration_var("PURGE_INTERVAL", "10m")?;

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw,
            })?,
            Err(_) => 5001,
        };

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_refresh_secret,
            access_token_ttl,
            refresh_token_ttl,
            submission_grace,
            purge_interval,
            port,
            cors_origins,
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            rust_log,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn duration_var(key: &'static str, default: &str) -> Result<u64, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    parse_duration(&raw).ok_or(ConfigError::Invalid { key, value: raw })
}

/// Parses "90", "45s", "15m", "1h" or "7d" into seconds.
pub fn parse_duration(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last()? {
        (i, c) if c.is_ascii_alphabetic() => (&raw[..i], c),
        _ => (raw, 's'),
    };
    let value: u64 = digits.parse().ok()?;
    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return None,
    };
    value.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("45s"), Some(45));
        assert_eq!(parse_duration("15m"), Some(900));
        assert_eq!(parse_duration("1h"), Some(3600));
        assert_eq!(parse_duration("7d"), Some(604_800));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("3w"), None);
        assert_eq!(parse_duration("-1h"), None);
    }
}
