//! Identity model - credential holders and their lockout state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of roles. A role is fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identity status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Locked,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Locked => "locked",
        }
    }
}

impl TryFrom<String> for IdentityStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(IdentityStatus::Active),
            "locked" => Ok(IdentityStatus::Locked),
            other => Err(format!("unknown identity status '{}'", other)),
        }
    }
}

/// Consecutive-failure lockout thresholds.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub failure_window: Duration,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            failure_window: Duration::minutes(15),
            lockout_duration: Duration::minutes(15),
        }
    }
}

/// Identity entity.
#[derive(Debug, Clone, FromRow)]
pub struct Identity {
    pub identity_id: Uuid,
    pub email: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[sqlx(try_from = "String")]
    pub status: IdentityStatus,
    pub failed_login_count: i32,
    pub failure_window_started_utc: Option<DateTime<Utc>>,
    pub locked_until_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Counter state written back after a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureState {
    pub status: IdentityStatus,
    pub failed_login_count: i32,
    pub failure_window_started_utc: Option<DateTime<Utc>>,
    pub locked_until_utc: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(email: String, password_hash: String, role: Role) -> Self {
        Self {
            identity_id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash,
            role,
            status: IdentityStatus::Active,
            failed_login_count: 0,
            failure_window_started_utc: None,
            locked_until_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Locked until the lockout window elapses; an expired lock no longer counts.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.status == IdentityStatus::Locked
            && self.locked_until_utc.map(|until| until > now).unwrap_or(true)
    }

    /// Failure bookkeeping for one more bad password at `now`.
    ///
    /// Failures older than the window start a fresh count. Reaching the
    /// threshold locks the identity and clears the counter so the next
    /// window after the lock starts from zero.
    pub fn register_failure(&self, now: DateTime<Utc>, policy: &LockoutPolicy) -> FailureState {
        let lock_elapsed = self.status == IdentityStatus::Locked && !self.is_locked(now);
        let window_open = self
            .failure_window_started_utc
            .map(|started| now - started < policy.failure_window)
            .unwrap_or(false);

        let (previous, window_started) = if window_open && !lock_elapsed {
            (self.failed_login_count, self.failure_window_started_utc.unwrap_or(now))
        } else {
            (0, now)
        };

        let count = previous + 1;
        if count >= policy.max_failed_attempts.max(1) as i32 {
            FailureState {
                status: IdentityStatus::Locked,
                failed_login_count: 0,
                failure_window_started_utc: None,
                locked_until_utc: Some(now + policy.lockout_duration),
            }
        } else {
            FailureState {
                status: IdentityStatus::Active,
                failed_login_count: count,
                failure_window_started_utc: Some(window_started),
                locked_until_utc: None,
            }
        }
    }

    pub fn apply_failure(&mut self, state: FailureState) {
        self.status = state.status;
        self.failed_login_count = state.failed_login_count;
        self.failure_window_started_utc = state.failure_window_started_utc;
        self.locked_until_utc = state.locked_until_utc;
    }

    pub fn clear_failures(&mut self) {
        self.apply_failure(FailureState {
            status: IdentityStatus::Active,
            failed_login_count: 0,
            failure_window_started_utc: None,
            locked_until_utc: None,
        });
    }
}

/// The authenticated caller, derived from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub identity_id: Uuid,
    pub role: Role,
    pub session_id: Uuid,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
