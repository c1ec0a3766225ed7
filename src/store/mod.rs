//! Persistence contract for accounts and their refresh tokens, plus the two
//! bundled backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lockout::{LockoutPolicy, LockoutState};
use crate::models::{Account, RefreshTokenRecord, RevocationReason};

pub mod memory;
pub mod postgres;

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Replacement or first-issue refresh token about to be persisted.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issued_from: Option<String>,
}

/// What happened to a rotation attempt.
#[derive(Debug)]
pub enum RotationOutcome {
    /// Presented token retired, replacement stored; the owning account rides
    /// along so the caller can mint claims without a second read.
    Rotated(Account),
    Unknown,
    Expired,
    AlreadyRevoked,
}

/// What happened to a single-token revocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationOutcome {
    Revoked,
    Unknown,
    Expired,
    AlreadyRevoked,
}

/// What happened to a reset-token consumption attempt. Mismatch and expiry
/// are deliberately indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Consumed,
    NoMatch,
}

/// Durable storage for accounts and refresh tokens.
///
/// Implementations must serialize read-modify-write sections per account:
/// lockout counter updates behave as if executed one at a time, and of any
/// set of concurrent rotations of one token value exactly one observes it
/// active.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new account together with its first session token, in one
    /// atomic step. Username and email uniqueness is enforced here, not by
    /// a pre-read.
    async fn create_account(
        &self,
        account: &Account,
        first_token: &NewRefreshToken,
    ) -> StoreResult<()>;

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;
    async fn account_by_username(&self, username: &str) -> StoreResult<Option<Account>>;
    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// Apply `policy` to one more failed login, returning the state written.
    /// Accounts that are locked at `now` keep their counters untouched.
    async fn record_login_failure(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<LockoutState>;

    /// Clear lockout counters, stamp the login time, and persist the new
    /// session token in one atomic step.
    async fn record_login_success(
        &self,
        account_id: Uuid,
        token: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Retire `presented` (reason `replaced`) and store `replacement` for
    /// the same account, atomically.
    async fn rotate_refresh_token(
        &self,
        presented: &str,
        replacement: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationOutcome>;

    /// Revoke `presented` if it is active at `now`.
    async fn revoke_refresh_token(
        &self,
        presented: &str,
        now: DateTime<Utc>,
        reason: RevocationReason,
        origin: Option<&str>,
    ) -> StoreResult<RevocationOutcome>;

    /// Revoke every token active at `now` for the account, returning how
    /// many were hit. Zero is not an error.
    async fn revoke_all_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
        reason: RevocationReason,
        origin: Option<&str>,
    ) -> StoreResult<u64>;

    /// Overwrite the account's single reset slot.
    async fn store_reset_token(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Compare `presented` with the stored slot; on an unexpired match, set
    /// the new password hash, clear the slot, and revoke all outstanding
    /// refresh tokens in one atomic step.
    async fn consume_reset_token(
        &self,
        account_id: Uuid,
        presented: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
        origin: Option<&str>,
    ) -> StoreResult<ResetOutcome>;

    async fn update_password_hash(&self, account_id: Uuid, new_hash: &str) -> StoreResult<()>;

    async fn refresh_token(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>>;
    async fn refresh_tokens_for_account(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Vec<RefreshTokenRecord>>;
}
