//! Persistence ports. Each operation that guards an invariant is atomic in
//! every adapter: conditional updates are single compare-and-set steps, never
//! a read followed by a separate write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StoreError;
use crate::models::{
    Account, AuditEntry, Identity, LockoutPolicy, NewTransfer, RefreshSession,
    RefreshTokenRecord, RevokeReason, StatusSummary, Transaction, TransactionFilter,
};

/// Result of placing a hold and recording a pending transfer.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(Transaction),
    /// The idempotency key is already bound to this transaction.
    Existing(Transaction),
    InsufficientFunds { available: i64 },
}

/// Result of applying the debit/credit pair of an approved transfer.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Completed(Transaction),
    Failed(Transaction),
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    /// Count one failed login and lock the identity at the threshold.
    /// Returns the identity as written.
    async fn record_login_failure(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<Identity, StoreError>;

    async fn reset_login_failures(&self, identity_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        session: &RefreshSession,
        token: &RefreshTokenRecord,
    ) -> Result<(), StoreError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, StoreError>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshTokenRecord, RefreshSession)>, StoreError>;

    /// Advance the chain to `next.generation` only if the session is still
    /// live at `expected_generation`. `None` means another rotation won.
    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_generation: i32,
        next: &RefreshTokenRecord,
    ) -> Result<Option<RefreshSession>, StoreError>;

    /// Revoke the whole chain. Returns false when it was already revoked.
    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn list_accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_transaction(&self, transaction_id: Uuid)
        -> Result<Option<Transaction>, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transaction>, StoreError>;

    /// Check available funds, hold the amount on the source account and
    /// insert the pending transfer in one atomic step.
    async fn create_pending(&self, transfer: &NewTransfer) -> Result<CreateOutcome, StoreError>;

    /// `pending -> approved`. `None` when the transfer is no longer pending.
    async fn approve_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError>;

    /// `pending -> rejected`, releasing the hold. `None` when no longer pending.
    async fn reject_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError>;

    /// `approved -> completed | failed`. Both account rows are updated in
    /// the same atomic step. `None` when the transfer is not approved.
    async fn settle_approved(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SettleOutcome>, StoreError>;

    /// `approved -> failed`, releasing the hold.
    async fn fail_approved(
        &self,
        transaction_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn summarize_by_status(&self) -> Result<Vec<StatusSummary>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn list_audit_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Every port, plus a liveness check for `/ready`.
#[async_trait]
pub trait Store:
    IdentityStore + SessionStore + AccountStore + TransactionStore + AuditStore
{
    async fn ping(&self) -> Result<(), StoreError>;
}
