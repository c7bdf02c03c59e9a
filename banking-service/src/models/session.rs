//! Refresh session model - one rotation chain per login.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use super::identity::Role;

/// Reasons a session chain is revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeReason {
    Logout,
    ReuseDetected,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Logout => "logout",
            RevokeReason::ReuseDetected => "reuse_detected",
        }
    }
}

/// Refresh session entity. `current_generation` names the only refresh
/// token of the chain that may still be exchanged.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshSession {
    pub session_id: Uuid,
    pub identity_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub current_generation: i32,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
}

impl RefreshSession {
    pub fn new(identity_id: Uuid, role: Role, expires_utc: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity_id,
            role,
            current_generation: 1,
            created_utc: Utc::now(),
            expires_utc,
            revoked_utc: None,
            revoke_reason: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}

/// One generation of a session's refresh token. Only the hash is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub generation: i32,
    pub session_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(token: &str, session_id: Uuid, generation: i32, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token_hash: Self::hash_token(token),
            generation,
            session_id,
            issued_utc: now,
            expires_utc: now + ttl,
        }
    }

    /// SHA-256 hex digest of the opaque token.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }
}
