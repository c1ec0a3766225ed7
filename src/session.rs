//! Session lifecycle orchestration.
//!
//! `SessionManager` ties the credential store, password hasher, lockout
//! policy, and token issuer together behind the public operations. It holds
//! no per-account state of its own; every operation re-reads through the
//! store, and the store's atomic sections carry the concurrency guarantees.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, StoreError};
use crate::lockout::LockoutPolicy;
use crate::models::{
    Account, AccountSummary, AuthenticatedSession, NewAccount, ResetTokenIssued, RevocationReason,
    Role,
};
use crate::passwords::PasswordService;
use crate::store::{
    CredentialStore, NewRefreshToken, ResetOutcome, RevocationOutcome, RotationOutcome,
};
use crate::tokens::{self, AccessTokenClaims, TokenService};
use crate::validate;

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    passwords: PasswordService,
    tokens: TokenService,
    policy: LockoutPolicy,
    refresh_token_ttl: Duration,
    reset_token_ttl: Duration,
}

impl SessionManager {
    pub fn new(config: &AuthConfig, store: Arc<dyn CredentialStore>) -> AuthResult<Self> {
        Ok(Self {
            store,
            passwords: PasswordService::new()?,
            tokens: TokenService::from_config(config),
            policy: LockoutPolicy::new(
                config.max_failed_logins,
                Duration::seconds(config.lockout_duration_secs),
            ),
            refresh_token_ttl: Duration::seconds(config.refresh_token_ttl_secs),
            reset_token_ttl: Duration::seconds(config.reset_token_ttl_secs),
        })
    }

    /// Create an account and return its first session.
    ///
    /// The account row and the first refresh token are written in a single
    /// store call, so a `Conflict` leaves nothing behind.
    pub async fn register(
        &self,
        new_account: NewAccount,
        origin: Option<&str>,
    ) -> AuthResult<AuthenticatedSession> {
        let username = new_account.username.trim();
        let email = new_account.email.trim().to_lowercase();

        validate::username(username)?;
        validate::email(&email)?;
        validate::password(&new_account.password)?;
        validate::optional_name("first name", new_account.first_name.as_deref())?;
        validate::optional_name("last name", new_account.last_name.as_deref())?;
        validate::optional_phone(new_account.phone.as_deref())?;

        let password_hash = self.passwords.hash_password(&new_account.password)?;
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email,
            password_hash,
            first_name: new_account.first_name,
            last_name: new_account.last_name,
            phone: new_account.phone,
            roles: vec![Role::User],
            is_active: true,
            created_at: now,
            last_login_at: None,
            failed_logins: 0,
            locked_until: None,
            reset_token: None,
            reset_token_expires_at: None,
        };
        let first_token = self.new_refresh_token(now, origin);

        self.store
            .create_account(&account, &first_token)
            .await
            .map_err(map_store_error)?;

        log::info!("registered account {} ({})", account.username, account.id);
        self.build_session(&account, first_token)
    }

    /// Authenticate with username and password.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        origin: Option<&str>,
    ) -> AuthResult<AuthenticatedSession> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let account = self
            .store
            .account_by_username(username)
            .await
            .map_err(map_store_error)?;

        // An unknown or deactivated account reads the same as a bad password.
        let mut account = match account {
            Some(account) if account.is_active => account,
            _ => return Err(AuthError::InvalidCredentials),
        };

        let now = Utc::now();
        if self.policy.is_locked(account.locked_until, now) {
            return Err(AuthError::AccountLocked);
        }

        if !self.passwords.verify_password(password, &account.password_hash) {
            let state = self
                .store
                .record_login_failure(account.id, &self.policy, now)
                .await
                .map_err(map_store_error)?;
            if state.locked_until.is_some() {
                log::warn!(
                    "account {} locked after {} failed logins",
                    account.username,
                    state.failed_logins
                );
            }
            return Err(AuthError::InvalidCredentials);
        }

        let refresh = self.new_refresh_token(now, origin);
        self.store
            .record_login_success(account.id, &refresh, now)
            .await
            .map_err(map_store_error)?;
        account.last_login_at = Some(now);

        log::info!("account {} logged in", account.username);
        self.build_session(&account, refresh)
    }

    /// Rotate a refresh token, returning a fresh session for its account.
    ///
    /// The presented value becomes unusable whether or not the caller keeps
    /// the replacement; replaying it afterwards yields `TokenRevoked`.
    pub async fn refresh(
        &self,
        presented: &str,
        origin: Option<&str>,
    ) -> AuthResult<AuthenticatedSession> {
        let now = Utc::now();
        let replacement = self.new_refresh_token(now, origin);

        let outcome = self
            .store
            .rotate_refresh_token(presented, &replacement, now)
            .await
            .map_err(map_store_error)?;

        match outcome {
            RotationOutcome::Rotated(account) => {
                log::debug!("rotated refresh token for account {}", account.id);
                self.build_session(&account, replacement)
            }
            RotationOutcome::Unknown => Err(AuthError::InvalidToken),
            RotationOutcome::Expired => Err(AuthError::TokenExpired),
            RotationOutcome::AlreadyRevoked => {
                log::warn!("replay of a rotated refresh token");
                Err(AuthError::TokenRevoked)
            }
        }
    }

    /// Revoke a single active refresh token.
    pub async fn revoke(&self, presented: &str, origin: Option<&str>) -> AuthResult<()> {
        let outcome = self
            .store
            .revoke_refresh_token(presented, Utc::now(), RevocationReason::Explicit, origin)
            .await
            .map_err(map_store_error)?;

        match outcome {
            RevocationOutcome::Revoked => Ok(()),
            RevocationOutcome::Unknown => Err(AuthError::InvalidToken),
            RevocationOutcome::Expired => Err(AuthError::TokenExpired),
            RevocationOutcome::AlreadyRevoked => Err(AuthError::TokenRevoked),
        }
    }

    /// Revoke every active refresh token for an account. Idempotent; returns
    /// the number revoked by this call.
    pub async fn revoke_all(&self, account_id: Uuid, origin: Option<&str>) -> AuthResult<u64> {
        let revoked = self
            .store
            .revoke_all_for_account(account_id, Utc::now(), RevocationReason::Logout, origin)
            .await
            .map_err(map_store_error)?;

        if revoked > 0 {
            log::info!("revoked {revoked} refresh tokens for account {account_id}");
        }
        Ok(revoked)
    }

    /// Issue a password-reset token, overwriting any outstanding one. The
    /// token is returned for the caller's mailer; it is never logged.
    pub async fn start_password_reset(&self, email: &str) -> AuthResult<ResetTokenIssued> {
        let email = email.trim().to_lowercase();
        let account = self
            .store
            .account_by_email(&email)
            .await
            .map_err(map_store_error)?
            .ok_or(AuthError::NotFound)?;

        let token = tokens::generate_opaque_token();
        let expires_at = Utc::now() + self.reset_token_ttl;
        self.store
            .store_reset_token(account.id, &token, expires_at)
            .await
            .map_err(map_store_error)?;

        log::info!("issued password reset token for account {}", account.id);
        Ok(ResetTokenIssued { token, expires_at })
    }

    /// Complete a password reset. Consumes the token, stores the new hash,
    /// and revokes every outstanding refresh token in one atomic store call.
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
        origin: Option<&str>,
    ) -> AuthResult<()> {
        validate::password(new_password)?;

        let email = email.trim().to_lowercase();
        // An unknown email reads the same as a bad token.
        let account = self
            .store
            .account_by_email(&email)
            .await
            .map_err(map_store_error)?
            .ok_or(AuthError::InvalidToken)?;

        let new_hash = self.passwords.hash_password(new_password)?;
        let outcome = self
            .store
            .consume_reset_token(account.id, token, &new_hash, Utc::now(), origin)
            .await
            .map_err(map_store_error)?;

        match outcome {
            ResetOutcome::Consumed => {
                log::info!("password reset completed for account {}", account.id);
                Ok(())
            }
            ResetOutcome::NoMatch => Err(AuthError::InvalidToken),
        }
    }

    /// Change a password with the current one as proof of possession.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        validate::password(new_password)?;

        let account = self
            .store
            .account_by_id(account_id)
            .await
            .map_err(map_store_error)?
            .ok_or(AuthError::NotFound)?;

        if !self
            .passwords
            .verify_password(current_password, &account.password_hash)
        {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = self.passwords.hash_password(new_password)?;
        self.store
            .update_password_hash(account.id, &new_hash)
            .await
            .map_err(map_store_error)?;

        log::info!("password changed for account {}", account.id);
        Ok(())
    }

    /// Check an access token's signature, expiry, issuer, and audience. No
    /// store lookup is involved.
    pub fn validate_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        self.tokens.validate_access_token(token)
    }

    fn new_refresh_token(&self, now: DateTime<Utc>, origin: Option<&str>) -> NewRefreshToken {
        NewRefreshToken {
            token: tokens::generate_opaque_token(),
            issued_at: now,
            expires_at: now + self.refresh_token_ttl,
            issued_from: origin.map(str::to_string),
        }
    }

    fn build_session(
        &self,
        account: &Account,
        refresh: NewRefreshToken,
    ) -> AuthResult<AuthenticatedSession> {
        let access = self.tokens.issue_access_token(account)?;
        Ok(AuthenticatedSession {
            account: AccountSummary::from(account),
            access_token: access.token,
            access_token_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_token_expires_at: refresh.expires_at,
        })
    }
}

fn map_store_error(err: StoreError) -> AuthError {
    match err {
        StoreError::Duplicate(field) => AuthError::Conflict(field),
        StoreError::AccountMissing => AuthError::NotFound,
        other => AuthError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_surface_as_conflicts() {
        assert!(matches!(
            map_store_error(StoreError::Duplicate("email")),
            AuthError::Conflict("email")
        ));
        assert!(matches!(
            map_store_error(StoreError::AccountMissing),
            AuthError::NotFound
        ));
        assert!(matches!(
            map_store_error(StoreError::Sqlx(sqlx::Error::RowNotFound)),
            AuthError::Store(_)
        ));
    }
}
