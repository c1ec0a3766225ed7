use std::ops::DerefMut;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction, migrate::Migrator};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lockout::{LockoutPolicy, LockoutState};
use crate::models::{Account, RefreshTokenRecord, RevocationReason, Role};
use crate::store::{
    CredentialStore, NewRefreshToken, ResetOutcome, RevocationOutcome, RotationOutcome,
    StoreResult,
};
use crate::tokens::constant_time_eq;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply any pending schema migrations.
///
/// Idempotent: already-applied migrations are skipped via SQLx's tracking
/// table.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("checking credential schema migration state");
    MIGRATOR.run(pool).await?;
    log::info!("credential schema migrations up to date");
    Ok(())
}

const ACCOUNT_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, phone, \
     roles, is_active, created_at, last_login_at, failed_logins, locked_until, reset_token, \
     reset_token_expires_at";

const TOKEN_COLUMNS: &str =
    "token, account_id, issued_at, expires_at, issued_from, revoked_at, revoked_from, \
     revocation_reason";

/// Postgres-backed store. Every read-modify-write section runs in a
/// transaction holding a `FOR UPDATE` row lock, which serializes lockout
/// counter updates and guarantees single-winner rotation.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Housekeeping: physically delete tokens that expired, or were revoked
    /// more than 30 days ago. Session operations never depend on this.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE expires_at <= $1 OR (revoked_at IS NOT NULL AND revoked_at <= $2)",
        )
        .bind(now)
        .bind(now - Duration::days(30))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_account_where(
        &self,
        predicate: &str,
        bind: AccountKey<'_>,
    ) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {predicate}");
        let query = sqlx::query(&sql);
        let query = match bind {
            AccountKey::Id(id) => query.bind(id),
            AccountKey::Text(value) => query.bind(value),
        };
        let row = query.fetch_optional(&self.pool).await?;
        row.map(|row| account_from_row(&row))
            .transpose()
            .map_err(StoreError::from)
    }
}

enum AccountKey<'a> {
    Id(Uuid),
    Text(&'a str),
}

fn account_from_row(row: &PgRow) -> Result<Account, sqlx::Error> {
    let roles: Vec<String> = row.try_get("roles")?;
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        roles: roles.iter().map(|role| Role::from_str(role)).collect(),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        last_login_at: row.try_get("last_login_at")?,
        failed_logins: row.try_get("failed_logins")?,
        locked_until: row.try_get("locked_until")?,
        reset_token: row.try_get("reset_token")?,
        reset_token_expires_at: row.try_get("reset_token_expires_at")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<RefreshTokenRecord, sqlx::Error> {
    let reason: Option<String> = row.try_get("revocation_reason")?;
    Ok(RefreshTokenRecord {
        token: row.try_get("token")?,
        account_id: row.try_get("account_id")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        issued_from: row.try_get("issued_from")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_from: row.try_get("revoked_from")?,
        revocation_reason: reason.as_deref().and_then(RevocationReason::from_str),
    })
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let field = if db_err
                .constraint()
                .map(|name| name.contains("email"))
                .unwrap_or(false)
            {
                "email"
            } else {
                "username"
            };
            return StoreError::Duplicate(field);
        }
    }
    StoreError::Sqlx(err)
}

async fn insert_token_tx(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    token: &NewRefreshToken,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO refresh_tokens (token, account_id, issued_at, expires_at, issued_from) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&token.token)
    .bind(account_id)
    .bind(token.issued_at)
    .bind(token.expires_at)
    .bind(token.issued_from.as_deref())
    .execute(tx.deref_mut())
    .await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create_account(
        &self,
        account: &Account,
        first_token: &NewRefreshToken,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let roles: Vec<String> = account
            .roles
            .iter()
            .map(|role| role.as_str().to_string())
            .collect();

        sqlx::query(
            "INSERT INTO accounts (id, username, email, password_hash, first_name, last_name, \
             phone, roles, is_active, created_at, failed_logins) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.first_name.as_deref())
        .bind(account.last_name.as_deref())
        .bind(account.phone.as_deref())
        .bind(&roles)
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.failed_logins)
        .execute(tx.deref_mut())
        .await
        .map_err(map_unique_violation)?;

        insert_token_tx(&mut tx, account.id, first_token).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        self.fetch_account_where("id = $1", AccountKey::Id(id)).await
    }

    async fn account_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        self.fetch_account_where("username = $1", AccountKey::Text(username))
            .await
    }

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        self.fetch_account_where("email = $1", AccountKey::Text(email))
            .await
    }

    async fn record_login_failure(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<LockoutState> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT failed_logins, locked_until FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(tx.deref_mut())
        .await?;

        let row = row.ok_or(StoreError::AccountMissing)?;
        let failed_logins: i32 = row.try_get("failed_logins")?;
        let locked_until: Option<DateTime<Utc>> = row.try_get("locked_until")?;

        // A racing login may have locked the row since the caller checked.
        if policy.is_locked(locked_until, now) {
            tx.commit().await?;
            return Ok(LockoutState {
                failed_logins,
                locked_until,
            });
        }

        let state = policy.after_failure(failed_logins, now);

        sqlx::query("UPDATE accounts SET failed_logins = $1, locked_until = $2 WHERE id = $3")
            .bind(state.failed_logins)
            .bind(state.locked_until)
            .bind(account_id)
            .execute(tx.deref_mut())
            .await?;

        tx.commit().await?;
        Ok(state)
    }

    async fn record_login_success(
        &self,
        account_id: Uuid,
        token: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE accounts SET failed_logins = 0, locked_until = NULL, last_login_at = $1 \
             WHERE id = $2",
        )
        .bind(now)
        .bind(account_id)
        .execute(tx.deref_mut())
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::AccountMissing);
        }

        insert_token_tx(&mut tx, account_id, token).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        presented: &str,
        replacement: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT account_id, expires_at, revoked_at FROM refresh_tokens \
             WHERE token = $1 FOR UPDATE",
        )
        .bind(presented)
        .fetch_optional(tx.deref_mut())
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(RotationOutcome::Unknown),
        };

        let account_id: Uuid = row.try_get("account_id")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at")?;

        if revoked_at.is_some() {
            return Ok(RotationOutcome::AlreadyRevoked);
        }
        if expires_at <= now {
            return Ok(RotationOutcome::Expired);
        }

        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1, revoked_from = $2, revocation_reason = $3 \
             WHERE token = $4",
        )
        .bind(now)
        .bind(replacement.issued_from.as_deref())
        .bind(RevocationReason::Replaced.as_str())
        .bind(presented)
        .execute(tx.deref_mut())
        .await?;

        insert_token_tx(&mut tx, account_id, replacement).await?;

        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let account_row = sqlx::query(&sql)
            .bind(account_id)
            .fetch_one(tx.deref_mut())
            .await?;
        let account = account_from_row(&account_row)?;

        tx.commit().await?;
        Ok(RotationOutcome::Rotated(account))
    }

    async fn revoke_refresh_token(
        &self,
        presented: &str,
        now: DateTime<Utc>,
        reason: RevocationReason,
        origin: Option<&str>,
    ) -> StoreResult<RevocationOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT expires_at, revoked_at FROM refresh_tokens WHERE token = $1 FOR UPDATE",
        )
        .bind(presented)
        .fetch_optional(tx.deref_mut())
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(RevocationOutcome::Unknown),
        };

        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at")?;

        if revoked_at.is_some() {
            return Ok(RevocationOutcome::AlreadyRevoked);
        }
        if expires_at <= now {
            return Ok(RevocationOutcome::Expired);
        }

        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1, revoked_from = $2, revocation_reason = $3 \
             WHERE token = $4",
        )
        .bind(now)
        .bind(origin)
        .bind(reason.as_str())
        .bind(presented)
        .execute(tx.deref_mut())
        .await?;

        tx.commit().await?;
        Ok(RevocationOutcome::Revoked)
    }

    async fn revoke_all_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
        reason: RevocationReason,
        origin: Option<&str>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1, revoked_from = $2, revocation_reason = $3 \
             WHERE account_id = $4 AND revoked_at IS NULL AND expires_at > $1",
        )
        .bind(now)
        .bind(origin)
        .bind(reason.as_str())
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn store_reset_token(
        &self,
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET reset_token = $1, reset_token_expires_at = $2 WHERE id = $3",
        )
        .bind(token)
        .bind(expires_at)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountMissing);
        }
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
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT reset_token, reset_token_expires_at FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(tx.deref_mut())
        .await?;

        let row = row.ok_or(StoreError::AccountMissing)?;
        let stored: Option<String> = row.try_get("reset_token")?;
        let expires_at: Option<DateTime<Utc>> = row.try_get("reset_token_expires_at")?;

        let matches = match (stored, expires_at) {
            (Some(stored), Some(expires_at)) => {
                constant_time_eq(stored.as_bytes(), presented.as_bytes()) && now < expires_at
            }
            _ => false,
        };
        if !matches {
            return Ok(ResetOutcome::NoMatch);
        }

        sqlx::query(
            "UPDATE accounts SET password_hash = $1, reset_token = NULL, \
             reset_token_expires_at = NULL WHERE id = $2",
        )
        .bind(new_password_hash)
        .bind(account_id)
        .execute(tx.deref_mut())
        .await?;

        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1, revoked_from = $2, revocation_reason = $3 \
             WHERE account_id = $4 AND revoked_at IS NULL AND expires_at > $1",
        )
        .bind(now)
        .bind(origin)
        .bind(RevocationReason::PasswordReset.as_str())
        .bind(account_id)
        .execute(tx.deref_mut())
        .await?;

        tx.commit().await?;
        Ok(ResetOutcome::Consumed)
    }

    async fn update_password_hash(&self, account_id: Uuid, new_hash: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE accounts SET password_hash = $1 WHERE id = $2")
            .bind(new_hash)
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountMissing);
        }
        Ok(())
    }

    async fn refresh_token(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token = $1");
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| token_from_row(&row))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn refresh_tokens_for_account(
        &self,
        account_id: Uuid,
    ) -> StoreResult<Vec<RefreshTokenRecord>> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE account_id = $1 ORDER BY issued_at"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| token_from_row(row).map_err(StoreError::from))
            .collect()
    }
}
