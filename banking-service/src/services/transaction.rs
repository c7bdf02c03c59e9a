//! Transfer creation and the approval state machine.
//!
//! Decisions and settlement go through single compare-and-set steps in the
//! store; the engine never reads a status and then writes it separately.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::audit::AuditLog;
use super::error::{StoreError, TxError, ValidationError};
use super::metrics;
use super::store::{CreateOutcome, SettleOutcome, Store};
use crate::models::{
    balances_by_currency, AdminDashboard, AuditAction, AuditEntry, AuditOutcome, ClientDashboard,
    Decision, NewTransfer, Principal, SubjectType, Transaction, TransactionFilter,
    TransactionStatus,
};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 255;
const LIST_LIMIT: i64 = 100;
const RECENT_LIMIT: i64 = 10;
const RECOVERY_BATCH: i64 = 500;

/// A client's request to move funds out of one of their accounts.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub from_account: Uuid,
    pub to_account: Uuid,
    pub amount: i64,
    pub idempotency_key: String,
    pub description: Option<String>,
}

impl TransferCommand {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.amount <= 0 {
            return Err(ValidationError::new("amount", "must be greater than zero"));
        }
        if self.from_account == self.to_account {
            return Err(ValidationError::new(
                "to_account",
                "must differ from the source account",
            ));
        }
        let key = self.idempotency_key.trim();
        if key.is_empty() {
            return Err(ValidationError::new("idempotency_key", "must not be empty"));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ValidationError::new(
                "idempotency_key",
                format!("must be at most {} characters", MAX_IDEMPOTENCY_KEY_LEN),
            ));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(ValidationError::new(
                    "description",
                    format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
                ));
            }
        }
        Ok(())
    }

    /// Same caller, accounts and amount as the transaction already bound to the key.
    pub fn is_replay_of(&self, existing: &Transaction, identity_id: Uuid) -> bool {
        existing.created_by == identity_id
            && existing.source_account_id == self.from_account
            && existing.destination_account_id == self.to_account
            && existing.amount == self.amount
    }
}

enum Prepared {
    Replay(Transaction),
    New(NewTransfer),
}

#[derive(Clone)]
pub struct TransactionEngine {
    store: Arc<dyn Store>,
    audit: AuditLog,
    request_timeout: Duration,
    settlement_retry: Duration,
}

impl TransactionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        audit: AuditLog,
        request_timeout: Duration,
        settlement_retry: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            request_timeout,
            settlement_retry,
        }
    }

    /// Place a hold and record a pending transfer.
    ///
    /// Replaying a key with the same parameters returns the original
    /// transaction in its current state. Reusing it for anything else is
    /// `DuplicateKey`.
    #[instrument(skip(self, principal, command), fields(identity_id = %principal.identity_id, idempotency_key = %command.idempotency_key))]
    pub async fn create_transfer(
        &self,
        principal: &Principal,
        command: TransferCommand,
    ) -> Result<Transaction, TxError> {
        command.validate()?;

        let prepared =
            match tokio::time::timeout(self.request_timeout, self.prepare(principal, &command))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.request_timeout.as_millis() as u64,
                        "Transfer creation timed out"
                    );
                    return Err(TxError::Timeout);
                }
            };

        let transfer = match prepared {
            Prepared::Replay(existing) => return self.replay(existing, principal, &command),
            Prepared::New(transfer) => transfer,
        };

        // No timeout past here: a committed hold is always audited.
        match self.store.create_pending(&transfer).await? {
            CreateOutcome::Created(tx) => {
                metrics::transfer_created();
                tracing::info!(
                    transaction_id = %tx.transaction_id,
                    amount = tx.amount,
                    currency = %tx.currency,
                    "Transfer created"
                );
                self.audit
                    .record(
                        AuditEntry::new(
                            Some(principal.identity_id),
                            AuditAction::TransferCreated,
                            SubjectType::Transaction,
                            tx.transaction_id.to_string(),
                            AuditOutcome::Success,
                        )
                        .with_metadata(json!({
                            "before": null,
                            "after": tx.status.as_str(),
                            "source_account_id": tx.source_account_id,
                            "destination_account_id": tx.destination_account_id,
                            "amount": tx.amount,
                            "currency": tx.currency,
                            "idempotency_key": tx.idempotency_key,
                        })),
                    )
                    .await;
                Ok(tx)
            }
            CreateOutcome::Existing(existing) => self.replay(existing, principal, &command),
            CreateOutcome::InsufficientFunds { available } => Err(TxError::InsufficientFunds {
                available,
                requested: command.amount,
            }),
        }
    }

    /// Read-only checks ahead of the write: idempotency fast path, ownership,
    /// and currency agreement.
    async fn prepare(
        &self,
        principal: &Principal,
        command: &TransferCommand,
    ) -> Result<Prepared, TxError> {
        let idempotency_key = command.idempotency_key.trim().to_string();

        if let Some(existing) = self.store.find_by_idempotency_key(&idempotency_key).await? {
            return Ok(Prepared::Replay(existing));
        }

        let source = self
            .store
            .find_account(command.from_account)
            .await?
            .filter(|account| account.is_owned_by(principal.identity_id))
            .ok_or_else(|| TxError::InvalidAccount("source account not found".to_string()))?;

        let destination = self
            .store
            .find_account(command.to_account)
            .await?
            .ok_or_else(|| TxError::InvalidAccount("destination account not found".to_string()))?;

        if source.currency != destination.currency {
            return Err(TxError::InvalidAccount(format!(
                "currency mismatch: {} to {}",
                source.currency, destination.currency
            )));
        }

        Ok(Prepared::New(NewTransfer {
            source_account_id: source.account_id,
            destination_account_id: destination.account_id,
            amount: command.amount,
            currency: source.currency,
            idempotency_key,
            description: command.description.clone(),
            created_by: principal.identity_id,
        }))
    }

    fn replay(
        &self,
        existing: Transaction,
        principal: &Principal,
        command: &TransferCommand,
    ) -> Result<Transaction, TxError> {
        if command.is_replay_of(&existing, principal.identity_id) {
            tracing::debug!(transaction_id = %existing.transaction_id, "Idempotent transfer replay");
            Ok(existing)
        } else {
            Err(TxError::DuplicateKey)
        }
    }

    /// Approve or reject a pending transfer. Exactly one concurrent decision
    /// wins; the others get `AlreadyDecided`. Approval settles immediately.
    #[instrument(skip(self, actor), fields(actor_id = %actor.identity_id))]
    pub async fn decide(
        &self,
        transaction_id: Uuid,
        actor: &Principal,
        decision: Decision,
    ) -> Result<Transaction, TxError> {
        let current = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(TxError::NotFound)?;

        let target = decision.target_status();
        if !current.status.can_transition_to(target) {
            return Err(TxError::AlreadyDecided(current.status));
        }

        let now = Utc::now();
        let won = match decision {
            Decision::Approve => {
                self.store
                    .approve_pending(transaction_id, actor.identity_id, now)
                    .await?
            }
            Decision::Reject => {
                self.store
                    .reject_pending(transaction_id, actor.identity_id, now)
                    .await?
            }
        };

        let Some(decided) = won else {
            let status = self
                .store
                .find_transaction(transaction_id)
                .await?
                .map(|tx| tx.status)
                .unwrap_or(current.status);
            tracing::info!(status = %status, "Lost decision race");
            return Err(TxError::AlreadyDecided(status));
        };

        metrics::transaction_decided(decided.status.as_str());
        self.record_transition(
            Some(actor.identity_id),
            &decided,
            TransactionStatus::Pending,
            json!({ "actor_role": actor.role.as_str() }),
        )
        .await;

        match decision {
            Decision::Reject => Ok(decided),
            Decision::Approve => self.settle(decided, Some(actor.identity_id)).await,
        }
    }

    /// Settle a transfer that is sitting in `approved`.
    #[instrument(skip(self))]
    pub async fn settle_transaction(&self, transaction_id: Uuid) -> Result<Transaction, TxError> {
        let tx = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(TxError::NotFound)?;

        if tx.status != TransactionStatus::Approved {
            return Err(TxError::InvalidTransition {
                from: tx.status,
                to: TransactionStatus::Completed,
            });
        }

        let actor = tx.decided_by;
        self.settle(tx, actor).await
    }

    async fn settle(
        &self,
        approved: Transaction,
        actor_id: Option<Uuid>,
    ) -> Result<Transaction, TxError> {
        let transaction_id = approved.transaction_id;
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.settlement_retry),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.store
                .settle_approved(transaction_id, Utc::now())
                .await
                .map_err(backoff::Error::transient)
        })
        .await;

        match result {
            Ok(Some(SettleOutcome::Completed(tx))) => {
                metrics::transaction_decided(tx.status.as_str());
                self.record_transition(
                    actor_id,
                    &tx,
                    TransactionStatus::Approved,
                    json!({ "debited": tx.source_account_id, "credited": tx.destination_account_id }),
                )
                .await;
                Ok(tx)
            }
            Ok(Some(SettleOutcome::Failed(tx))) => self.settlement_failed(actor_id, tx).await,
            Ok(None) => {
                // Settled by someone else, e.g. the startup sweep.
                let tx = self
                    .store
                    .find_transaction(transaction_id)
                    .await?
                    .ok_or(TxError::NotFound)?;
                let status = tx.status;
                match status {
                    TransactionStatus::Failed => Err(TxError::SettlementFailed {
                        transaction_id,
                        reason: tx.failure_reason.unwrap_or_default(),
                    }),
                    _ => Ok(tx),
                }
            }
            Err(e) => self.abandon_settlement(actor_id, &approved, e).await,
        }
    }

    async fn settlement_failed(
        &self,
        actor_id: Option<Uuid>,
        tx: Transaction,
    ) -> Result<Transaction, TxError> {
        let reason = tx.failure_reason.clone().unwrap_or_default();
        metrics::settlement_failed();
        metrics::transaction_decided(tx.status.as_str());
        tracing::error!(
            transaction_id = %tx.transaction_id,
            source_account_id = %tx.source_account_id,
            destination_account_id = %tx.destination_account_id,
            amount = tx.amount,
            currency = %tx.currency,
            prior_status = %TransactionStatus::Approved,
            reason = %reason,
            "Settlement failed"
        );
        self.record_transition(
            actor_id,
            &tx,
            TransactionStatus::Approved,
            json!({ "reason": reason }),
        )
        .await;

        Err(TxError::SettlementFailed {
            transaction_id: tx.transaction_id,
            reason,
        })
    }

    /// The store kept failing through the retry window. Try to close the
    /// transfer as failed; if that also fails it stays approved for the
    /// startup sweep.
    async fn abandon_settlement(
        &self,
        actor_id: Option<Uuid>,
        approved: &Transaction,
        error: StoreError,
    ) -> Result<Transaction, TxError> {
        tracing::error!(
            error = %error,
            transaction_id = %approved.transaction_id,
            source_account_id = %approved.source_account_id,
            destination_account_id = %approved.destination_account_id,
            amount = approved.amount,
            "Settlement store error, marking transfer failed"
        );

        let reason = format!("settlement error: {}", error);
        match self
            .store
            .fail_approved(approved.transaction_id, &reason, Utc::now())
            .await
        {
            Ok(Some(failed)) => self.settlement_failed(actor_id, failed).await,
            Ok(None) => {
                let tx = self
                    .store
                    .find_transaction(approved.transaction_id)
                    .await?
                    .ok_or(TxError::NotFound)?;
                Ok(tx)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    transaction_id = %approved.transaction_id,
                    "Could not mark transfer failed, leaving it approved for recovery"
                );
                Err(TxError::Store(error))
            }
        }
    }

    async fn record_transition(
        &self,
        actor_id: Option<Uuid>,
        tx: &Transaction,
        before: TransactionStatus,
        extra: serde_json::Value,
    ) {
        let (action, outcome) = match tx.status {
            TransactionStatus::Approved => (AuditAction::TransactionApproved, AuditOutcome::Success),
            TransactionStatus::Rejected => (AuditAction::TransactionRejected, AuditOutcome::Success),
            TransactionStatus::Completed => {
                (AuditAction::TransactionCompleted, AuditOutcome::Success)
            }
            TransactionStatus::Failed => (AuditAction::TransactionFailed, AuditOutcome::Failure),
            TransactionStatus::Pending => (AuditAction::TransferCreated, AuditOutcome::Success),
        };

        self.audit
            .record(
                AuditEntry::new(
                    actor_id,
                    action,
                    SubjectType::Transaction,
                    tx.transaction_id.to_string(),
                    outcome,
                )
                .with_metadata(json!({
                    "before": before.as_str(),
                    "after": tx.status.as_str(),
                    "amount": tx.amount,
                    "currency": tx.currency,
                    "detail": extra,
                })),
            )
            .await;
    }

    /// Resolve transfers left in `approved` by a crash between decision and
    /// settlement. Returns how many were resolved.
    pub async fn recover_stuck_settlements(&self) -> Result<usize, TxError> {
        let stuck = self
            .store
            .list_transactions(&TransactionFilter {
                status: Some(TransactionStatus::Approved),
                account_ids: None,
                limit: RECOVERY_BATCH,
            })
            .await?;

        let mut resolved = 0;
        for tx in stuck {
            let transaction_id = tx.transaction_id;
            let actor = tx.decided_by;
            match self.settle(tx, actor).await {
                Ok(_) | Err(TxError::SettlementFailed { .. }) => resolved += 1,
                Err(e) => {
                    tracing::error!(error = %e, transaction_id = %transaction_id, "Recovery settlement failed");
                }
            }
        }

        if resolved > 0 {
            tracing::info!(resolved = resolved, "Recovered approved transfers");
        }
        Ok(resolved)
    }

    /// Transfers touching any of the caller's accounts, newest first.
    pub async fn list_for_client(&self, principal: &Principal) -> Result<Vec<Transaction>, TxError> {
        self.client_transactions(principal, LIST_LIMIT).await
    }

    async fn client_transactions(
        &self,
        principal: &Principal,
        limit: i64,
    ) -> Result<Vec<Transaction>, TxError> {
        let accounts = self
            .store
            .list_accounts_for_owner(principal.identity_id)
            .await?;
        if accounts.is_empty() {
            return Ok(Vec::new());
        }

        let transactions = self
            .store
            .list_transactions(&TransactionFilter {
                status: None,
                account_ids: Some(accounts.iter().map(|a| a.account_id).collect()),
                limit,
            })
            .await?;
        Ok(transactions)
    }

    pub async fn client_dashboard(&self, principal: &Principal) -> Result<ClientDashboard, TxError> {
        let accounts = self
            .store
            .list_accounts_for_owner(principal.identity_id)
            .await?;
        let transactions = self.client_transactions(principal, LIST_LIMIT).await?;

        let pending_count = transactions
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .count();
        let recent_transactions = transactions
            .into_iter()
            .take(RECENT_LIMIT as usize)
            .collect();

        Ok(ClientDashboard {
            balances: balances_by_currency(&accounts),
            accounts,
            pending_count,
            recent_transactions,
        })
    }

    pub async fn admin_list(
        &self,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>, TxError> {
        let transactions = self
            .store
            .list_transactions(&TransactionFilter {
                status,
                account_ids: None,
                limit: LIST_LIMIT,
            })
            .await?;
        Ok(transactions)
    }

    pub async fn admin_dashboard(&self) -> Result<AdminDashboard, TxError> {
        let summaries = self.store.summarize_by_status().await?;
        Ok(AdminDashboard::from_summaries(summaries))
    }

    pub async fn audit_trail(&self, transaction_id: Uuid) -> Result<Vec<AuditEntry>, TxError> {
        if self.store.find_transaction(transaction_id).await?.is_none() {
            return Err(TxError::NotFound);
        }
        Ok(self
            .audit
            .trail(SubjectType::Transaction, &transaction_id.to_string())
            .await?)
    }
}
