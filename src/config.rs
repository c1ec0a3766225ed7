use std::env;

use crate::error::{AuthError, AuthResult};

/// Credential and session configuration loaded from environment variables.
///
/// Only the JWT secret is required; everything else has a default. Tests and
/// embedders may also construct the struct directly.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub reset_token_ttl_secs: i64,
    pub max_failed_logins: i32,
    pub lockout_duration_secs: i64,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let jwt_secret = env::var("GATEHOUSE_JWT_SECRET")
            .map_err(|_| AuthError::Config("GATEHOUSE_JWT_SECRET is required".into()))?;

        Ok(Self {
            issuer: env_string("GATEHOUSE_JWT_ISSUER", "gatehouse"),
            audience: env_string("GATEHOUSE_JWT_AUDIENCE", "gatehouse-clients"),
            jwt_secret,
            access_token_ttl_secs: env_i64("GATEHOUSE_ACCESS_TOKEN_TTL_SECS", 60 * 60),
            refresh_token_ttl_secs: env_i64("GATEHOUSE_REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60),
            reset_token_ttl_secs: env_i64("GATEHOUSE_RESET_TOKEN_TTL_SECS", 24 * 60 * 60),
            max_failed_logins: env_i32("GATEHOUSE_LOCKOUT_MAX_FAILURES", 5),
            lockout_duration_secs: env_i64("GATEHOUSE_LOCKOUT_DURATION_SECS", 15 * 60),
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}
