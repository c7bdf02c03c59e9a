use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::audit::AuditLog;
use super::error::AuthError;
use super::metrics;
use super::store::Store;
use super::token::{TokenPair, TokenService};
use crate::models::{
    AuditAction, AuditEntry, AuditOutcome, Identity, LockoutPolicy, Principal, RevokeReason,
    SubjectType,
};
use crate::utils::{hash_password, verify_password_blocking, Password, PasswordHashString};

/// What the credential check found, before anything is written.
enum Verification {
    UnknownEmail,
    Locked(Identity),
    WrongPassword(Identity),
    Accepted(Identity),
}

/// Credential verification and session lifecycle on top of [`TokenService`].
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    tokens: TokenService,
    audit: AuditLog,
    lockout: LockoutPolicy,
    /// Verified against when the email is unknown so every login pays one
    /// argon2 verification.
    dummy_hash: PasswordHashString,
    request_timeout: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        audit: AuditLog,
        lockout: LockoutPolicy,
        request_timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let dummy_hash = hash_password(&Password::new(uuid::Uuid::new_v4().to_string()))?;
        Ok(Self {
            store,
            tokens,
            audit,
            lockout,
            dummy_hash,
            request_timeout,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verify credentials and start a session.
    ///
    /// A locked identity is refused with `Locked` even when the password is
    /// right. The request timeout bounds the lookup and hash verification
    /// only. The writes that follow always run to completion along with their
    /// audit entries.
    #[instrument(skip(self, password), fields(client = client.unwrap_or("-")))]
    pub async fn login(
        &self,
        email: &str,
        password: Password,
        client: Option<&str>,
    ) -> Result<(Identity, TokenPair), AuthError> {
        let email = email.trim().to_lowercase();
        let verification =
            match tokio::time::timeout(self.request_timeout, self.verify(&email, password)).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.request_timeout.as_millis() as u64,
                        "Login timed out"
                    );
                    return Err(AuthError::Unavailable);
                }
            };

        match verification {
            Verification::UnknownEmail => {
                metrics::login_attempt("invalid_credentials");
                self.audit
                    .record(
                        AuditEntry::new(
                            None,
                            AuditAction::LoginFailed,
                            SubjectType::Identity,
                            email.as_str(),
                            AuditOutcome::Failure,
                        )
                        .with_metadata(json!({ "reason": "unknown_email", "client": client })),
                    )
                    .await;
                Err(AuthError::InvalidCredentials)
            }
            Verification::Locked(identity) => {
                tracing::warn!(identity_id = %identity.identity_id, "Login attempt on locked identity");
                self.refuse_locked(&identity, client).await;
                Err(AuthError::Locked)
            }
            Verification::WrongPassword(identity) => {
                self.record_wrong_password(identity, client).await
            }
            Verification::Accepted(identity) => self.start_session(identity, client).await,
        }
    }

    async fn verify(&self, email: &str, password: Password) -> Result<Verification, AuthError> {
        let Some(identity) = self.store.find_identity_by_email(email).await? else {
            verify_password_blocking(password, self.dummy_hash.clone()).await?;
            return Ok(Verification::UnknownEmail);
        };

        let verified = verify_password_blocking(
            password,
            PasswordHashString::new(identity.password_hash.clone()),
        )
        .await?;

        Ok(if identity.is_locked(Utc::now()) {
            Verification::Locked(identity)
        } else if verified {
            Verification::Accepted(identity)
        } else {
            Verification::WrongPassword(identity)
        })
    }

    async fn refuse_locked(&self, identity: &Identity, client: Option<&str>) {
        metrics::login_attempt("locked");
        self.audit
            .record(
                AuditEntry::new(
                    Some(identity.identity_id),
                    AuditAction::LoginLocked,
                    SubjectType::Identity,
                    identity.identity_id.to_string(),
                    AuditOutcome::Denied,
                )
                .with_metadata(json!({
                    "locked_until": identity.locked_until_utc,
                    "client": client,
                })),
            )
            .await;
    }

    async fn record_wrong_password(
        &self,
        identity: Identity,
        client: Option<&str>,
    ) -> Result<(Identity, TokenPair), AuthError> {
        let now = Utc::now();
        let updated = self
            .store
            .record_login_failure(identity.identity_id, now, &self.lockout)
            .await?;

        if updated.is_locked(now) {
            tracing::warn!(
                identity_id = %identity.identity_id,
                max_failed_attempts = self.lockout.max_failed_attempts,
                "Identity locked after repeated failed logins"
            );
            self.refuse_locked(&updated, client).await;
            return Err(AuthError::Locked);
        }

        metrics::login_attempt("invalid_credentials");
        self.audit
            .record(
                AuditEntry::new(
                    Some(identity.identity_id),
                    AuditAction::LoginFailed,
                    SubjectType::Identity,
                    identity.identity_id.to_string(),
                    AuditOutcome::Failure,
                )
                .with_metadata(json!({
                    "failed_attempts": updated.failed_login_count,
                    "client": client,
                })),
            )
            .await;
        Err(AuthError::InvalidCredentials)
    }

    async fn start_session(
        &self,
        identity: Identity,
        client: Option<&str>,
    ) -> Result<(Identity, TokenPair), AuthError> {
        if identity.failed_login_count > 0 || identity.locked_until_utc.is_some() {
            self.store.reset_login_failures(identity.identity_id).await?;
        }

        let pair = self.tokens.issue(&identity).await?;

        metrics::login_attempt("success");
        tracing::info!(
            identity_id = %identity.identity_id,
            session_id = %pair.session_id,
            role = %identity.role,
            "Login succeeded"
        );
        self.audit
            .record(
                AuditEntry::new(
                    Some(identity.identity_id),
                    AuditAction::LoginSucceeded,
                    SubjectType::Identity,
                    identity.identity_id.to_string(),
                    AuditOutcome::Success,
                )
                .with_metadata(json!({
                    "session_id": pair.session_id,
                    "client": client,
                })),
            )
            .await;

        Ok((identity, pair))
    }

    /// End the caller's session chain.
    ///
    /// The logout is recorded as soon as the store revocation commits. A
    /// cache that cannot be reached is still reported to the caller.
    #[instrument(skip(self, principal), fields(identity_id = %principal.identity_id))]
    pub async fn logout(&self, principal: &Principal) -> Result<(), AuthError> {
        self.tokens
            .revoke(
                principal.session_id,
                Some(principal.identity_id),
                RevokeReason::Logout,
            )
            .await?;

        let published = self.tokens.publish_revocation(principal.session_id).await;

        self.audit
            .record(
                AuditEntry::new(
                    Some(principal.identity_id),
                    AuditAction::Logout,
                    SubjectType::Session,
                    principal.session_id.to_string(),
                    AuditOutcome::Success,
                )
                .with_metadata(json!({ "cache_published": published.is_ok() })),
            )
            .await;

        published
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.tokens.rotate(refresh_token).await
    }
}
