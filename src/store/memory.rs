use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::lockout::{LockoutPolicy, LockoutState};
use crate::models::{Account, RefreshTokenRecord, RevocationReason};
use crate::store::{
    CredentialStore, NewRefreshToken, ResetOutcome, RevocationOutcome, RotationOutcome,
    StoreResult,
};
use crate::tokens::constant_time_eq;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    tokens: HashMap<String, RefreshTokenRecord>,
}

/// Map-backed store for tests and single-process embedding.
///
/// One mutex serializes every read-modify-write section, which is the whole
/// concurrency contract of `CredentialStore`.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<MemoryState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Fixture hooks for the in-crate test support; none of these belong to
    // the store contract.

    pub(crate) fn rewind_lockout(&self, account_id: Uuid, to: DateTime<Utc>) {
        let mut guard = self.state.lock();
        if let Some(account) = guard.accounts.get_mut(&account_id) {
            if account.locked_until.is_some() {
                account.locked_until = Some(to);
            }
        }
    }

    pub(crate) fn rewind_reset_expiry(&self, account_id: Uuid, to: DateTime<Utc>) {
        let mut guard = self.state.lock();
        if let Some(account) = guard.accounts.get_mut(&account_id) {
            if account.reset_token_expires_at.is_some() {
                account.reset_token_expires_at = Some(to);
            }
        }
    }

    pub(crate) fn rewind_token_expiry(&self, token: &str, to: DateTime<Utc>) {
        let mut guard = self.state.lock();
        if let Some(record) = guard.tokens.get_mut(token) {
            record.expires_at = to;
        }
    }

    pub(crate) fn set_active(&self, account_id: Uuid, active: bool) {
        let mut guard = self.state.lock();
        if let Some(account) = guard.accounts.get_mut(&account_id) {
            account.is_active = active;
        }
    }

    pub(crate) fn failed_logins(&self, account_id: Uuid) -> Option<i32> {
        let guard = self.state.lock();
        guard
            .accounts
            .get(&account_id)
            .map(|account| account.failed_logins)
    }
}

fn record_from(account_id: Uuid, token: &NewRefreshToken) -> RefreshTokenRecord {
    RefreshTokenRecord {
        token: token.token.clone(),
        account_id,
        issued_at: token.issued_at,
        expires_at: token.expires_at,
        issued_from: token.issued_from.clone(),
        revoked_at: None,
        revoked_from: None,
        revocation_reason: None,
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_account(
        &self,
        account: &Account,
        first_token: &NewRefreshToken,
    ) -> StoreResult<()> {
        let mut guard = self.state.lock();

        if guard
            .accounts
            .values()
            .any(|existing| existing.username == account.username)
        {
            return Err(StoreError::Duplicate("username"));
        }
        if guard
            .accounts
            .values()
            .any(|existing| existing.email == account.email)
        {
            return Err(StoreError::Duplicate("email"));
        }

        guard.accounts.insert(account.id, account.clone());
        guard.tokens.insert(
            first_token.token.clone(),
            record_from(account.id, first_token),
        );
        Ok(())
    }

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.state.lock().accounts.get(&id).cloned())
    }

    async fn account_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .state
            .lock()
            .accounts
            .values()
            .find(|account| account.username == username)
            .cloned())
    }

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .state
            .lock()
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn record_login_failure(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<LockoutState> {
        let mut guard = self.state.lock();
        let account = guard
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountMissing)?;

        // A racing login may have locked the row since the caller checked.
        if policy.is_locked(account.locked_until, now) {
            return Ok(LockoutState {
                failed_logins: account.failed_logins,
                locked_until: account.locked_until,
            });
        }

        let state = policy.after_failure(account.failed_logins, now);
        account.failed_logins = state.failed_logins;
        account.locked_until = state.locked_until;
        Ok(state)
    }

    async fn record_login_success(
        &self,
        account_id: Uuid,
        token: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountMissing)?;
        account.failed_logins = 0;
        account.locked_until = None;
        account.last_login_at = Some(now);

        state
            .tokens
            .insert(token.token.clone(), record_from(account_id, token));
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        presented: &str,
        replacement: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let record = match state.tokens.get_mut(presented) {
            Some(record) => record,
            None => return Ok(RotationOutcome::Unknown),
        };

        if record.revoked_at.is_some() {
            return Ok(RotationOutcome::AlreadyRevoked);
        }
        if record.expires_at <= now {
            return Ok(RotationOutcome::Expired);
        }

        record.revoked_at = Some(now);
        record.revoked_from = replacement.issued_from.clone();
        record.revocation_reason = Some(RevocationReason::Replaced);
        let account_id = record.account_id;

        state.tokens.insert(
            replacement.token.clone(),
            record_from(account_id, replacement),
        );

        let account = state
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(StoreError::AccountMissing)?;
        Ok(RotationOutcome::Rotated(account))
    }

    async fn revoke_refresh_token(
        &self,
        presented: &str,
        now: DateTime<Utc>,
        reason: RevocationReason,
        origin: Option<&str>,
    ) -> StoreResult<RevocationOutcome> {
        let mut guard = self.state.lock();

        let record = match guard.tokens.get_mut(presented) {
            Some(record) => record,
            None => return Ok(RevocationOutcome::Unknown),
        };

        if record.revoked_at.is_some() {
            return Ok(RevocationOutcome::AlreadyRevoked);
        }
        if record.expires_at <= now {
            return Ok(RevocationOutcome::Expired);
        }

        record.revoked_at = Some(now);
        record.revoked_from = origin.map(|value| value.to_string());
        record.revocation_reason = Some(reason);
        Ok(RevocationOutcome::Revoked)
    }

    async fn revoke_all_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
        reason: RevocationReason,
        origin: Option<&str>,
    ) -> StoreResult<u64> {
        let mut guard = self.state.lock();
        let mut revoked = 0;

        for record in guard.tokens.values_mut() {
            if record.account_id == account_id && record.is_active(now) {
                record.revoked_at = Some(now);
                record.revoked_from = origin.map(|value| value.to_string());
                record.revocation_reason = Some(reason);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn store_reset_token(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let account = guard
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountMissing)?;
        account.reset_token = Some(token.to_string());
        account.reset_token_expires_at = Some(expires_at);
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        account_id: Uuid,
        presented: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
        origin: Option<&str>,
    ) -> StoreResult<ResetOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountMissing)?;

        let matches = match (&account.reset_token, account.reset_token_expires_at) {
            (Some(stored), Some(expires_at)) => {
                constant_time_eq(stored.as_bytes(), presented.as_bytes()) && now < expires_at
            }
            _ => false,
        };
        if !matches {
            return Ok(ResetOutcome::NoMatch);
        }

        account.password_hash = new_password_hash.to_string();
        account.reset_token = None;
        account.reset_token_expires_at = None;

        for record in state.tokens.values_mut() {
            if record.account_id == account_id && record.is_active(now) {
                record.revoked_at = Some(now);
                record.revoked_from = origin.map(|value| value.to_string());
                record.revocation_reason = Some(RevocationReason::PasswordReset);
            }
        }
        Ok(ResetOutcome::Consumed)
    }

    async fn update_password_hash(&self, account_id: Uuid, new_hash: &str) -> StoreResult<()> {
        let mut guard = self.state.lock();
        let account = guard
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountMissing)?;
        account.password_hash = new_hash.to_string();
        Ok(())
    }

    async fn refresh_token(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.state.lock().tokens.get(token).cloned())
    }

    async fn refresh_tokens_for_account(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Vec<RefreshTokenRecord>> {
        Ok(self
            .state
            .lock()
            .tokens
            .values()
            .filter(|record| record.account_id == account_id)
            .cloned()
            .collect())
    }
}
