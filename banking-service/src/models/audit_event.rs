//! Audit entry model - append-only record of state-changing actions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    LoginSucceeded,
    LoginFailed,
    LoginLocked,
    Logout,
    TokenIssued,
    TokenRotated,
    TokenRevoked,
    TokenReuseDetected,
    RefreshDenied,
    TransferCreated,
    TransactionApproved,
    TransactionRejected,
    TransactionCompleted,
    TransactionFailed,
    AccessDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSucceeded => "login_succeeded",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::LoginLocked => "login_locked",
            AuditAction::Logout => "logout",
            AuditAction::TokenIssued => "token_issued",
            AuditAction::TokenRotated => "token_rotated",
            AuditAction::TokenRevoked => "token_revoked",
            AuditAction::TokenReuseDetected => "token_reuse_detected",
            AuditAction::RefreshDenied => "refresh_denied",
            AuditAction::TransferCreated => "transfer_created",
            AuditAction::TransactionApproved => "transaction_approved",
            AuditAction::TransactionRejected => "transaction_rejected",
            AuditAction::TransactionCompleted => "transaction_completed",
            AuditAction::TransactionFailed => "transaction_failed",
            AuditAction::AccessDenied => "access_denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    Identity,
    Session,
    Transaction,
    Route,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Identity => "identity",
            SubjectType::Session => "session",
            SubjectType::Transaction => "transaction",
            SubjectType::Route => "route",
        }
    }
}

/// Audit entry entity. Never updated or deleted once written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub subject_type: String,
    pub subject_id: Option<String>,
    pub outcome: String,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: Option<Uuid>,
        action: AuditAction,
        subject_type: SubjectType,
        subject_id: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            actor_id,
            action: action.as_str().to_string(),
            subject_type: subject_type.as_str().to_string(),
            subject_id: Some(subject_id.into()),
            outcome: outcome.as_str().to_string(),
            metadata: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is(&self, action: AuditAction) -> bool {
        self.action == action.as_str()
    }
}
