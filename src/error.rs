use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Typed failures returned by credential and session operations.
///
/// Everything up to `NotFound` is a business outcome the caller branches on;
/// `Store`, `Hash`, `Jwt`, and `Config` are infrastructure faults for an
/// outer boundary handler.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} already taken")]
    Conflict(&'static str),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked")]
    AccountLocked,
    #[error("token invalid")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("not found")]
    NotFound,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("password hashing error: {0}")]
    Hash(String),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// True for failures that indicate broken infrastructure rather than a
    /// rejected request.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            AuthError::Store(_) | AuthError::Hash(_) | AuthError::Jwt(_) | AuthError::Config(_)
        )
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Hash(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::Hash(err.to_string())
    }
}

/// Failures raised by a credential store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already taken")]
    Duplicate(&'static str),
    #[error("account not found")]
    AccountMissing,
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}
