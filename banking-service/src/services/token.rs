use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::instrument;
use uuid::Uuid;

use super::audit::AuditLog;
use super::error::AuthError;
use super::jwt::JwtService;
use super::metrics;
use super::revocation::RevocationCache;
use super::store::Store;
use crate::models::{
    AuditAction, AuditEntry, AuditOutcome, Identity, Principal, RefreshSession,
    RefreshTokenRecord, RevokeReason, Role, SubjectType,
};

const REFRESH_TOKEN_BYTES: usize = 32;

/// Access/refresh pair handed to the client.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Issues, validates, rotates and revokes session tokens.
#[derive(Clone)]
pub struct TokenService {
    jwt: JwtService,
    store: Arc<dyn Store>,
    cache: Arc<dyn RevocationCache>,
    audit: AuditLog,
    refresh_token_ttl: Duration,
    cache_timeout: std::time::Duration,
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_well_formed_refresh_token(token: &str) -> bool {
    token.len() == REFRESH_TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

impl TokenService {
    pub fn new(
        jwt: JwtService,
        store: Arc<dyn Store>,
        cache: Arc<dyn RevocationCache>,
        audit: AuditLog,
        refresh_token_ttl: Duration,
        cache_timeout: std::time::Duration,
    ) -> Self {
        Self {
            jwt,
            store,
            cache,
            audit,
            refresh_token_ttl,
            cache_timeout,
        }
    }

    fn revocation_ttl(&self) -> std::time::Duration {
        self.jwt
            .access_token_ttl()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(60))
    }

    fn sign_pair(
        &self,
        identity_id: Uuid,
        role: Role,
        session_id: Uuid,
        refresh_token: String,
    ) -> Result<TokenPair, AuthError> {
        let access = self
            .jwt
            .generate_access_token(identity_id, role, session_id)?;
        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            expires_at: access.expires_at,
            session_id,
        })
    }

    /// Start a new session chain at generation 1.
    #[instrument(skip(self, identity), fields(identity_id = %identity.identity_id))]
    pub async fn issue(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        let refresh_token = generate_refresh_token();
        let session = RefreshSession::new(
            identity.identity_id,
            identity.role,
            Utc::now() + self.refresh_token_ttl,
        );
        let record =
            RefreshTokenRecord::new(&refresh_token, session.session_id, 1, self.refresh_token_ttl);

        self.store.create_session(&session, &record).await?;
        let pair = self.sign_pair(
            identity.identity_id,
            identity.role,
            session.session_id,
            refresh_token,
        )?;

        self.audit
            .record(
                AuditEntry::new(
                    Some(identity.identity_id),
                    AuditAction::TokenIssued,
                    SubjectType::Session,
                    session.session_id.to_string(),
                    AuditOutcome::Success,
                )
                .with_metadata(json!({ "generation": 1, "role": identity.role.as_str() })),
            )
            .await;

        Ok(pair)
    }

    /// Check signature and expiry, then the shared revocation set. A slow or
    /// failing cache rejects the token.
    pub async fn validate_access(&self, token: &str) -> Result<Principal, AuthError> {
        let principal = self.jwt.validate_access_token(token)?;

        let lookup = tokio::time::timeout(
            self.cache_timeout,
            self.cache.is_session_revoked(principal.session_id),
        )
        .await;

        match lookup {
            Ok(Ok(false)) => Ok(principal),
            Ok(Ok(true)) => Err(AuthError::Revoked),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Revocation cache lookup failed");
                Err(AuthError::Unavailable)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.cache_timeout.as_millis() as u64,
                    "Revocation cache lookup timed out"
                );
                Err(AuthError::Unavailable)
            }
        }
    }

    /// Exchange the current refresh token for a new pair at generation + 1.
    ///
    /// Presenting a superseded generation, or losing a concurrent rotation,
    /// is treated as theft: the whole chain is revoked.
    #[instrument(skip(self, refresh_token))]
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let presented_hash = RefreshTokenRecord::hash_token(refresh_token);
        if !is_well_formed_refresh_token(refresh_token) {
            self.deny_refresh(None, &presented_hash, "malformed").await;
            return Err(AuthError::Malformed);
        }

        let Some((record, session)) = self.store.find_refresh_token(&presented_hash).await? else {
            self.deny_refresh(None, &presented_hash, "unknown_token").await;
            return Err(AuthError::Revoked);
        };

        if !bool::from(record.token_hash.as_bytes().ct_eq(presented_hash.as_bytes())) {
            self.deny_refresh(None, &presented_hash, "unknown_token").await;
            return Err(AuthError::Revoked);
        }

        if session.is_revoked() {
            self.deny_refresh(Some(&session), &presented_hash, "revoked").await;
            return Err(AuthError::Revoked);
        }

        if record.generation < session.current_generation {
            self.revoke_chain_on_reuse(&session, record.generation).await;
            return Err(AuthError::ReuseDetected);
        }

        let now = Utc::now();
        if record.is_expired(now) || session.expires_utc <= now {
            self.deny_refresh(Some(&session), &presented_hash, "expired").await;
            return Err(AuthError::Expired);
        }

        let next_token = generate_refresh_token();
        let next_generation = record.generation + 1;
        let next = RefreshTokenRecord::new(
            &next_token,
            session.session_id,
            next_generation,
            self.refresh_token_ttl,
        );

        let rotated = self
            .store
            .rotate_session(session.session_id, record.generation, &next)
            .await?;

        let Some(rotated) = rotated else {
            // Lost the compare-and-set. Either the chain was revoked meanwhile
            // or the same token was exchanged twice concurrently.
            let current = self.store.find_session(session.session_id).await?;
            if current.map(|s| s.is_revoked()).unwrap_or(true) {
                self.deny_refresh(Some(&session), &presented_hash, "revoked").await;
                return Err(AuthError::Revoked);
            }
            self.revoke_chain_on_reuse(&session, record.generation).await;
            return Err(AuthError::ReuseDetected);
        };

        let pair = self.sign_pair(
            rotated.identity_id,
            rotated.role,
            rotated.session_id,
            next_token,
        )?;

        self.audit
            .record(
                AuditEntry::new(
                    Some(rotated.identity_id),
                    AuditAction::TokenRotated,
                    SubjectType::Session,
                    rotated.session_id.to_string(),
                    AuditOutcome::Success,
                )
                .with_metadata(json!({
                    "previous_generation": record.generation,
                    "generation": rotated.current_generation,
                })),
            )
            .await;

        Ok(pair)
    }

    /// Void the session's current and future generations. Once this returns
    /// `Ok` no refresh can succeed for the session, whatever the cache does;
    /// follow with [`publish_revocation`](Self::publish_revocation) to cut off
    /// its access tokens.
    #[instrument(skip(self))]
    pub async fn revoke(
        &self,
        session_id: Uuid,
        actor_id: Option<Uuid>,
        reason: RevokeReason,
    ) -> Result<(), AuthError> {
        let newly_revoked = self
            .store
            .revoke_session(session_id, reason, Utc::now())
            .await?;

        self.audit
            .record(
                AuditEntry::new(
                    actor_id,
                    AuditAction::TokenRevoked,
                    SubjectType::Session,
                    session_id.to_string(),
                    AuditOutcome::Success,
                )
                .with_metadata(json!({
                    "reason": reason.as_str(),
                    "already_revoked": !newly_revoked,
                })),
            )
            .await;

        Ok(())
    }

    /// Push the revocation to the shared cache so live access tokens stop
    /// validating on every instance.
    pub async fn publish_revocation(&self, session_id: Uuid) -> Result<(), AuthError> {
        let write = tokio::time::timeout(
            self.cache_timeout,
            self.cache
                .revoke_session(session_id, self.revocation_ttl()),
        )
        .await;

        match write {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, session_id = %session_id, "Failed to publish session revocation");
                Err(AuthError::Unavailable)
            }
            Err(_) => {
                tracing::error!(session_id = %session_id, "Publishing session revocation timed out");
                Err(AuthError::Unavailable)
            }
        }
    }

    /// Record a refused exchange. Without a matching session the subject is
    /// the presented token's hash.
    async fn deny_refresh(
        &self,
        session: Option<&RefreshSession>,
        presented_hash: &str,
        reason: &'static str,
    ) {
        tracing::info!(
            session_id = ?session.map(|s| s.session_id),
            reason,
            "Refresh token rejected"
        );
        let entry = match session {
            Some(session) => AuditEntry::new(
                Some(session.identity_id),
                AuditAction::RefreshDenied,
                SubjectType::Session,
                session.session_id.to_string(),
                AuditOutcome::Denied,
            ),
            None => AuditEntry::new(
                None,
                AuditAction::RefreshDenied,
                SubjectType::Session,
                presented_hash,
                AuditOutcome::Denied,
            ),
        };
        self.audit
            .record(entry.with_metadata(json!({ "reason": reason })))
            .await;
    }

    async fn revoke_chain_on_reuse(&self, session: &RefreshSession, presented_generation: i32) {
        tracing::warn!(
            session_id = %session.session_id,
            identity_id = %session.identity_id,
            presented_generation = presented_generation,
            current_generation = session.current_generation,
            "Refresh token reuse detected, revoking session chain"
        );
        metrics::token_reuse_detected();

        match self
            .store
            .revoke_session(session.session_id, RevokeReason::ReuseDetected, Utc::now())
            .await
        {
            Ok(_) => {
                let _ = self.publish_revocation(session.session_id).await;
            }
            Err(e) => {
                tracing::error!(error = %e, session_id = %session.session_id, "Failed to revoke compromised session");
            }
        }

        self.audit
            .record(
                AuditEntry::new(
                    Some(session.identity_id),
                    AuditAction::TokenReuseDetected,
                    SubjectType::Session,
                    session.session_id.to_string(),
                    AuditOutcome::Denied,
                )
                .with_metadata(json!({
                    "presented_generation": presented_generation,
                    "current_generation": session.current_generation,
                })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_tokens_are_random_hex() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert!(is_well_formed_refresh_token(&a));
    }

    #[test]
    fn test_malformed_refresh_tokens_rejected_by_shape() {
        assert!(!is_well_formed_refresh_token(""));
        assert!(!is_well_formed_refresh_token("abc"));
        assert!(!is_well_formed_refresh_token(&"z".repeat(64)));
    }
}
