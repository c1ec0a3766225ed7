use chrono::{DateTime, Duration, Utc};

/// Brute-force lockout rules.
///
/// The policy itself is pure; stores apply it inside their atomic sections
/// so concurrent failures cannot lose counter updates.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_logins: i32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_logins: 5,
            lockout_duration: Duration::minutes(15),
        }
    }
}

/// Counter state persisted on the account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutState {
    pub failed_logins: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutPolicy {
    pub fn new(max_failed_logins: i32, lockout_duration: Duration) -> Self {
        Self {
            max_failed_logins,
            lockout_duration,
        }
    }

    /// Locked while `now` is strictly before the stamped expiry.
    pub fn is_locked(&self, locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        matches!(locked_until, Some(until) if now < until)
    }

    /// Counter state after one more failed verification at `now`.
    pub fn after_failure(&self, failed_logins: i32, now: DateTime<Utc>) -> LockoutState {
        let failed_logins = failed_logins + 1;
        let locked_until = if failed_logins >= self.max_failed_logins {
            Some(now + self.lockout_duration)
        } else {
            None
        };
        LockoutState {
            failed_logins,
            locked_until,
        }
    }

    /// Counter state after a successful authentication.
    pub fn after_success(&self) -> LockoutState {
        LockoutState {
            failed_logins: 0,
            locked_until: None,
        }
    }
}
