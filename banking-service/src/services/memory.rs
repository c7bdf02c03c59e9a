//! In-process store used in dev mode and by the test suite. One mutex guards
//! all state, so every port operation is atomic with respect to the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::error::StoreError;
use super::store::{
    AccountStore, AuditStore, CreateOutcome, IdentityStore, SessionStore, SettleOutcome, Store,
    TransactionStore,
};
use crate::models::{
    Account, AuditEntry, Identity, LockoutPolicy, NewTransfer, RefreshSession,
    RefreshTokenRecord, RevokeReason, StatusSummary, Transaction, TransactionFilter,
    TransactionStatus,
};

#[derive(Default)]
struct State {
    identities: HashMap<Uuid, Identity>,
    sessions: HashMap<Uuid, RefreshSession>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    idempotency: HashMap<String, Uuid>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Every audit entry in append order.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.lock()?.audit.clone())
    }
}

impl State {
    fn release_hold(&mut self, account_id: Uuid, amount: i64) -> Result<(), StoreError> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::Corrupt(format!("account {} missing", account_id)))?;
        account.held_balance = (account.held_balance - amount).max(0);
        Ok(())
    }

    fn transition(
        &mut self,
        transaction_id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> Option<&mut Transaction> {
        match self.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.status == expected && expected.can_transition_to(next) => {
                tx.status = next;
                Some(tx)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state
            .identities
            .values()
            .any(|existing| existing.email == identity.email)
        {
            return Err(StoreError::Duplicate(format!("email {}", identity.email)));
        }
        state
            .identities
            .insert(identity.identity_id, identity.clone());
        Ok(())
    }

    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.lock()?.identities.get(&identity_id).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let email = email.to_lowercase();
        Ok(self
            .lock()?
            .identities
            .values()
            .find(|identity| identity.email == email)
            .cloned())
    }

    async fn record_login_failure(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<Identity, StoreError> {
        let mut state = self.lock()?;
        let identity = state
            .identities
            .get_mut(&identity_id)
            .ok_or_else(|| StoreError::Corrupt(format!("identity {} missing", identity_id)))?;
        let failure = identity.register_failure(now, policy);
        identity.apply_failure(failure);
        Ok(identity.clone())
    }

    async fn reset_login_failures(&self, identity_id: Uuid) -> Result<(), StoreError> {
        if let Some(identity) = self.lock()?.identities.get_mut(&identity_id) {
            identity.clear_failures();
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        session: &RefreshSession,
        token: &RefreshTokenRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.sessions.insert(session.session_id, session.clone());
        state
            .refresh_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, StoreError> {
        Ok(self.lock()?.sessions.get(&session_id).cloned())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshTokenRecord, RefreshSession)>, StoreError> {
        let state = self.lock()?;
        let found = state.refresh_tokens.get(token_hash).and_then(|record| {
            state
                .sessions
                .get(&record.session_id)
                .map(|session| (record.clone(), session.clone()))
        });
        Ok(found)
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_generation: i32,
        next: &RefreshTokenRecord,
    ) -> Result<Option<RefreshSession>, StoreError> {
        let mut state = self.lock()?;
        let rotated = match state.sessions.get_mut(&session_id) {
            Some(session)
                if !session.is_revoked() && session.current_generation == expected_generation =>
            {
                session.current_generation = next.generation;
                session.expires_utc = next.expires_utc;
                session.clone()
            }
            _ => return Ok(None),
        };
        state
            .refresh_tokens
            .insert(next.token_hash.clone(), next.clone());
        Ok(Some(rotated))
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if !session.is_revoked() => {
                session.revoked_utc = Some(now);
                session.revoke_reason = Some(reason.as_str().to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state
            .accounts
            .values()
            .any(|existing| existing.account_number == account.account_number)
        {
            return Err(StoreError::Duplicate(format!(
                "account number {}",
                account.account_number
            )));
        }
        state.accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.accounts.get(&account_id).cloned())
    }

    async fn list_accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .lock()?
            .accounts
            .values()
            .filter(|account| account.owner_id == owner_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|account| account.created_utc);
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn find_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.lock()?.transactions.get(&transaction_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transaction>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .idempotency
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn create_pending(&self, transfer: &NewTransfer) -> Result<CreateOutcome, StoreError> {
        let mut state = self.lock()?;

        if let Some(existing) = state
            .idempotency
            .get(&transfer.idempotency_key)
            .and_then(|id| state.transactions.get(id))
        {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }

        let source = state
            .accounts
            .get_mut(&transfer.source_account_id)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("account {} missing", transfer.source_account_id))
            })?;

        let available = source.available_balance();
        if available < transfer.amount {
            return Ok(CreateOutcome::InsufficientFunds { available });
        }
        source.held_balance += transfer.amount;

        let tx = transfer.clone().into_pending();
        state
            .idempotency
            .insert(tx.idempotency_key.clone(), tx.transaction_id);
        state.transactions.insert(tx.transaction_id, tx.clone());
        Ok(CreateOutcome::Created(tx))
    }

    async fn approve_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut state = self.lock()?;
        Ok(state
            .transition(
                transaction_id,
                TransactionStatus::Pending,
                TransactionStatus::Approved,
            )
            .map(|tx| {
                tx.decided_by = Some(actor_id);
                tx.decided_utc = Some(now);
                tx.clone()
            }))
    }

    async fn reject_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut state = self.lock()?;
        let rejected = match state.transition(
            transaction_id,
            TransactionStatus::Pending,
            TransactionStatus::Rejected,
        ) {
            Some(tx) => {
                tx.decided_by = Some(actor_id);
                tx.decided_utc = Some(now);
                tx.clone()
            }
            None => return Ok(None),
        };
        state.release_hold(rejected.source_account_id, rejected.amount)?;
        Ok(Some(rejected))
    }

    async fn settle_approved(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SettleOutcome>, StoreError> {
        let mut state = self.lock()?;
        let tx = match state.transactions.get(&transaction_id) {
            Some(tx) if tx.status == TransactionStatus::Approved => tx.clone(),
            _ => return Ok(None),
        };

        let posting = {
            let source = state.accounts.get(&tx.source_account_id);
            let destination = state.accounts.get(&tx.destination_account_id);
            match (source, destination) {
                (None, _) => Err("source account no longer exists".to_string()),
                (_, None) => Err("destination account no longer exists".to_string()),
                (Some(src), Some(dst)) if src.currency != dst.currency => {
                    Err("currency mismatch between accounts".to_string())
                }
                (Some(src), _) if src.balance < tx.amount => Err(format!(
                    "insufficient funds at settlement: balance {}, amount {}",
                    src.balance, tx.amount
                )),
                (Some(src), Some(dst)) => match (
                    src.balance.checked_sub(tx.amount),
                    dst.balance.checked_add(tx.amount),
                ) {
                    (Some(debited), Some(credited)) => Ok((debited, credited)),
                    _ => Err(format!(
                        "balance overflow at settlement: amount {}",
                        tx.amount
                    )),
                },
            }
        };

        let (debited, credited) = match posting {
            Ok(balances) => balances,
            Err(reason) => {
                if state.accounts.contains_key(&tx.source_account_id) {
                    state.release_hold(tx.source_account_id, tx.amount)?;
                }
                let failed = state
                    .transition(
                        transaction_id,
                        TransactionStatus::Approved,
                        TransactionStatus::Failed,
                    )
                    .map(|tx| {
                        tx.failure_reason = Some(reason);
                        tx.settled_utc = Some(now);
                        tx.clone()
                    });
                return Ok(failed.map(SettleOutcome::Failed));
            }
        };

        if let Some(source) = state.accounts.get_mut(&tx.source_account_id) {
            source.balance = debited;
            source.held_balance = (source.held_balance - tx.amount).max(0);
        }
        if let Some(destination) = state.accounts.get_mut(&tx.destination_account_id) {
            destination.balance = credited;
        }

        let completed = state
            .transition(
                transaction_id,
                TransactionStatus::Approved,
                TransactionStatus::Completed,
            )
            .map(|tx| {
                tx.settled_utc = Some(now);
                tx.clone()
            });
        Ok(completed.map(SettleOutcome::Completed))
    }

    async fn fail_approved(
        &self,
        transaction_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut state = self.lock()?;
        let failed = match state.transition(
            transaction_id,
            TransactionStatus::Approved,
            TransactionStatus::Failed,
        ) {
            Some(tx) => {
                tx.failure_reason = Some(reason.to_string());
                tx.settled_utc = Some(now);
                tx.clone()
            }
            None => return Ok(None),
        };
        if state.accounts.contains_key(&failed.source_account_id) {
            state.release_hold(failed.source_account_id, failed.amount)?;
        }
        Ok(Some(failed))
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.lock()?;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| filter.status.map(|s| tx.status == s).unwrap_or(true))
            .filter(|tx| {
                filter
                    .account_ids
                    .as_ref()
                    .map(|ids| ids.iter().any(|id| tx.touches_account(*id)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        transactions.truncate(filter.limit.max(0) as usize);
        Ok(transactions)
    }

    async fn summarize_by_status(&self) -> Result<Vec<StatusSummary>, StoreError> {
        let state = self.lock()?;
        let summaries = TransactionStatus::ALL
            .into_iter()
            .filter_map(|status| {
                let matching = state.transactions.values().filter(|tx| tx.status == status);
                let (count, total_amount) =
                    matching.fold((0i64, 0i64), |(c, t), tx| (c + 1, t + tx.amount));
                (count > 0).then_some(StatusSummary {
                    status,
                    count,
                    total_amount,
                })
            })
            .collect();
        Ok(summaries)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter(|entry| {
                entry.subject_type == subject_type
                    && entry.subject_id.as_deref() == Some(subject_id)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
