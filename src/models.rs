use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ===== Accounts =====

/// Granted role, stored per account. Accounts may hold several.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Staff,
    Admin,
}

impl Role {
    pub fn from_str(role: &str) -> Self {
        match role {
            "admin" => Role::Admin,
            "staff" => Role::Staff,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::User => "user",
        }
    }
}

/// One stored account, including credential and lockout state.
///
/// `password_hash` and the reset-token slot never serialize; they stay
/// between the store and the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub failed_logins: i32,
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub reset_token: Option<String>,
    #[serde(skip)]
    pub reset_token_expires_at: Option<DateTime<Utc>>,
}

/// Registration input. Profile fields are optional; validation rules apply
/// to whatever is present.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Account view handed back to callers alongside tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub roles: Vec<Role>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            roles: account.roles.clone(),
            last_login_at: account.last_login_at,
        }
    }
}

// ===== Refresh tokens =====

/// Why a refresh token was retired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationReason {
    /// Rotated out by a successful refresh.
    Replaced,
    /// Revoked one at a time by its holder.
    Explicit,
    /// Swept up by a revoke-all.
    Logout,
    /// Invalidated because the password was reset.
    PasswordReset,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Replaced => "replaced",
            RevocationReason::Explicit => "explicit",
            RevocationReason::Logout => "logout",
            RevocationReason::PasswordReset => "password-reset",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "replaced" => Some(RevocationReason::Replaced),
            "explicit" => Some(RevocationReason::Explicit),
            "logout" => Some(RevocationReason::Logout),
            "password-reset" => Some(RevocationReason::PasswordReset),
            _ => None,
        }
    }
}

/// One stored refresh token. Rows are never deleted by session operations;
/// revoked and expired tokens stay behind as inert audit records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub account_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issued_from: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_from: Option<String>,
    pub revocation_reason: Option<RevocationReason>,
}

impl RefreshTokenRecord {
    /// A token grants a refresh only while unrevoked and unexpired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

// ===== Session results =====

/// Result of a successful register, login, or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedSession {
    pub account: AccountSummary,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Reset token handed to the caller for out-of-band delivery.
#[derive(Debug, Clone)]
pub struct ResetTokenIssued {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
