//! PostgreSQL store for banking-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as SqlTransaction};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::error::StoreError;
use super::metrics::record_db_query;
use super::store::{
    AccountStore, AuditStore, CreateOutcome, IdentityStore, SessionStore, SettleOutcome, Store,
    TransactionStore,
};
use crate::models::{
    Account, AuditEntry, Identity, LockoutPolicy, NewTransfer, RefreshSession,
    RefreshTokenRecord, RevokeReason, StatusSummary, Transaction, TransactionFilter,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "banking-service"))]
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        info!(max_connections = max_connections, "Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn release_hold(
        tx: &mut SqlTransaction<'_, Postgres>,
        account_id: Uuid,
        amount: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET held_balance = GREATEST(held_balance - $2, 0) WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        tx: &mut SqlTransaction<'_, Postgres>,
        transaction_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let failed = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'failed', failure_reason = $2, settled_utc = $3
            WHERE transaction_id = $1 AND status = 'approved'
            RETURNING transaction_id, source_account_id, destination_account_id, amount, currency,
                      idempotency_key, description, status, created_by, created_utc,
                      decided_by, decided_utc, settled_utc, failure_reason
            "#,
        )
        .bind(transaction_id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(failed)
    }
}

#[async_trait]
impl IdentityStore for Database {
    #[instrument(skip(self, identity), fields(identity_id = %identity.identity_id))]
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO identities (identity_id, email, password_hash, role, status, failed_login_count,
                                    failure_window_started_utc, locked_until_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(identity.identity_id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.role.as_str())
        .bind(identity.status.as_str())
        .bind(identity.failed_login_count)
        .bind(identity.failure_window_started_utc)
        .bind(identity.locked_until_utc)
        .bind(identity.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("email {}", identity.email))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT identity_id, email, password_hash, role, status, failed_login_count,
                   failure_window_started_utc, locked_until_utc, created_utc
            FROM identities
            WHERE identity_id = $1
            "#,
        )
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    #[instrument(skip(self, email))]
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let started = Instant::now();
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT identity_id, email, password_hash, role, status, failed_login_count,
                   failure_window_started_utc, locked_until_utc, created_utc
            FROM identities
            WHERE email = $1
            "#,
        )
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        record_db_query("find_identity_by_email", started);
        Ok(identity)
    }

    #[instrument(skip(self, policy))]
    async fn record_login_failure(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<Identity, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT identity_id, email, password_hash, role, status, failed_login_count,
                   failure_window_started_utc, locked_until_utc, created_utc
            FROM identities
            WHERE identity_id = $1
            FOR UPDATE
            "#,
        )
        .bind(identity_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Corrupt(format!("identity {} missing", identity_id)))?;

        let failure = identity.register_failure(now, policy);

        sqlx::query(
            r#"
            UPDATE identities
            SET status = $2, failed_login_count = $3, failure_window_started_utc = $4, locked_until_utc = $5
            WHERE identity_id = $1
            "#,
        )
        .bind(identity_id)
        .bind(failure.status.as_str())
        .bind(failure.failed_login_count)
        .bind(failure.failure_window_started_utc)
        .bind(failure.locked_until_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        identity.apply_failure(failure);
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn reset_login_failures(&self, identity_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET status = 'active', failed_login_count = 0,
                failure_window_started_utc = NULL, locked_until_utc = NULL
            WHERE identity_id = $1
            "#,
        )
        .bind(identity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    #[instrument(skip(self, session, token), fields(session_id = %session.session_id))]
    async fn create_session(
        &self,
        session: &RefreshSession,
        token: &RefreshTokenRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (session_id, identity_id, role, current_generation, created_utc, expires_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id)
        .bind(session.identity_id)
        .bind(session.role.as_str())
        .bind(session.current_generation)
        .bind(session.created_utc)
        .bind(session.expires_utc)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_hash, generation, session_id, issued_utc, expires_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.generation)
        .bind(token.session_id)
        .bind(token.issued_utc)
        .bind(token.expires_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, StoreError> {
        let session = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT session_id, identity_id, role, current_generation, created_utc, expires_utc,
                   revoked_utc, revoke_reason
            FROM refresh_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    #[instrument(skip(self, token_hash))]
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshTokenRecord, RefreshSession)>, StoreError> {
        let started = Instant::now();
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT token_hash, generation, session_id, issued_utc, expires_utc
            FROM refresh_tokens
            WHERE token_hash = $1
            ORDER BY generation DESC
            LIMIT 1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        let found = match record {
            Some(record) => self
                .find_session(record.session_id)
                .await?
                .map(|session| (record, session)),
            None => None,
        };
        record_db_query("find_refresh_token", started);
        Ok(found)
    }

    #[instrument(skip(self, next), fields(next_generation = next.generation))]
    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_generation: i32,
        next: &RefreshTokenRecord,
    ) -> Result<Option<RefreshSession>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rotated = sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE refresh_sessions
            SET current_generation = $3, expires_utc = $4
            WHERE session_id = $1 AND current_generation = $2 AND revoked_utc IS NULL
            RETURNING session_id, identity_id, role, current_generation, created_utc, expires_utc,
                      revoked_utc, revoke_reason
            "#,
        )
        .bind(session_id)
        .bind(expected_generation)
        .bind(next.generation)
        .bind(next.expires_utc)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(rotated) = rotated else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_hash, generation, session_id, issued_utc, expires_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&next.token_hash)
        .bind(next.generation)
        .bind(next.session_id)
        .bind(next.issued_utc)
        .bind(next.expires_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(rotated))
    }

    #[instrument(skip(self))]
    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_utc = $2, revoke_reason = $3
            WHERE session_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(session_id)
        .bind(now)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AccountStore for Database {
    #[instrument(skip(self, account), fields(account_id = %account.account_id))]
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, owner_id, account_number, currency, balance, held_balance, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.account_id)
        .bind(account.owner_id)
        .bind(&account.account_number)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.held_balance)
        .bind(account.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("account number {}", account.account_number))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, owner_id, account_number, currency, balance, held_balance, created_utc
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    #[instrument(skip(self))]
    async fn list_accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, owner_id, account_number, currency, balance, held_balance, created_utc
            FROM accounts
            WHERE owner_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionStore for Database {
    #[instrument(skip(self))]
    async fn find_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, StoreError> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, source_account_id, destination_account_id, amount, currency,
                   idempotency_key, description, status, created_by, created_utc,
                   decided_by, decided_utc, settled_utc, failure_reason
            FROM transactions
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    #[instrument(skip(self, key))]
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transaction>, StoreError> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, source_account_id, destination_account_id, amount, currency,
                   idempotency_key, description, status, created_by, created_utc,
                   decided_by, decided_utc, settled_utc, failure_reason
            FROM transactions
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    #[instrument(skip(self, transfer), fields(source = %transfer.source_account_id, amount = transfer.amount))]
    async fn create_pending(&self, transfer: &NewTransfer) -> Result<CreateOutcome, StoreError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, source_account_id, destination_account_id, amount, currency,
                   idempotency_key, description, status, created_by, created_utc,
                   decided_by, decided_utc, settled_utc, failure_reason
            FROM transactions
            WHERE idempotency_key = $1
            "#,
        )
        .bind(&transfer.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?
        {
            tx.rollback().await?;
            return Ok(CreateOutcome::Existing(existing));
        }

        let source = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, owner_id, account_number, currency, balance, held_balance, created_utc
            FROM accounts
            WHERE account_id = $1
            FOR UPDATE
            "#,
        )
        .bind(transfer.source_account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            StoreError::Corrupt(format!("account {} missing", transfer.source_account_id))
        })?;

        let available = source.available_balance();
        if available < transfer.amount {
            tx.rollback().await?;
            return Ok(CreateOutcome::InsufficientFunds { available });
        }

        sqlx::query("UPDATE accounts SET held_balance = held_balance + $2 WHERE account_id = $1")
            .bind(transfer.source_account_id)
            .bind(transfer.amount)
            .execute(&mut *tx)
            .await?;

        let pending = transfer.clone().into_pending();
        let inserted = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (transaction_id, source_account_id, destination_account_id, amount, currency,
                                      idempotency_key, description, status, created_by, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING transaction_id, source_account_id, destination_account_id, amount, currency,
                      idempotency_key, description, status, created_by, created_utc,
                      decided_by, decided_utc, settled_utc, failure_reason
            "#,
        )
        .bind(pending.transaction_id)
        .bind(pending.source_account_id)
        .bind(pending.destination_account_id)
        .bind(pending.amount)
        .bind(&pending.currency)
        .bind(&pending.idempotency_key)
        .bind(&pending.description)
        .bind(pending.status.as_str())
        .bind(pending.created_by)
        .bind(pending.created_utc)
        .fetch_one(&mut *tx)
        .await;

        let created = match inserted {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => {
                // A concurrent request bound the key first; hand back its transfer
                tx.rollback().await?;
                return self
                    .find_by_idempotency_key(&transfer.idempotency_key)
                    .await?
                    .map(CreateOutcome::Existing)
                    .ok_or_else(|| {
                        StoreError::Duplicate(format!(
                            "idempotency key {}",
                            transfer.idempotency_key
                        ))
                    });
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        record_db_query("create_pending", started);
        Ok(CreateOutcome::Created(created))
    }

    #[instrument(skip(self))]
    async fn approve_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let approved = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'approved', decided_by = $2, decided_utc = $3
            WHERE transaction_id = $1 AND status = 'pending'
            RETURNING transaction_id, source_account_id, destination_account_id, amount, currency,
                      idempotency_key, description, status, created_by, created_utc,
                      decided_by, decided_utc, settled_utc, failure_reason
            "#,
        )
        .bind(transaction_id)
        .bind(actor_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(approved)
    }

    #[instrument(skip(self))]
    async fn reject_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rejected = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = 'rejected', decided_by = $2, decided_utc = $3
            WHERE transaction_id = $1 AND status = 'pending'
            RETURNING transaction_id, source_account_id, destination_account_id, amount, currency,
                      idempotency_key, description, status, created_by, created_utc,
                      decided_by, decided_utc, settled_utc, failure_reason
            "#,
        )
        .bind(transaction_id)
        .bind(actor_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(rejected) = rejected else {
            tx.rollback().await?;
            return Ok(None);
        };

        Self::release_hold(&mut tx, rejected.source_account_id, rejected.amount).await?;
        tx.commit().await?;
        Ok(Some(rejected))
    }

    #[instrument(skip(self))]
    async fn settle_approved(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SettleOutcome>, StoreError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let approved = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, source_account_id, destination_account_id, amount, currency,
                   idempotency_key, description, status, created_by, created_utc,
                   decided_by, decided_utc, settled_utc, failure_reason
            FROM transactions
            WHERE transaction_id = $1 AND status = 'approved'
            FOR UPDATE
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(approved) = approved else {
            tx.rollback().await?;
            return Ok(None);
        };

        // Lock both rows in id order so concurrent settlements cannot deadlock
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, owner_id, account_number, currency, balance, held_balance, created_utc
            FROM accounts
            WHERE account_id = ANY($1)
            ORDER BY account_id
            FOR UPDATE
            "#,
        )
        .bind(vec![approved.source_account_id, approved.destination_account_id])
        .fetch_all(&mut *tx)
        .await?;

        let source = accounts
            .iter()
            .find(|a| a.account_id == approved.source_account_id);
        let destination = accounts
            .iter()
            .find(|a| a.account_id == approved.destination_account_id);

        let failure = match (source, destination) {
            (None, _) => Some("source account no longer exists".to_string()),
            (_, None) => Some("destination account no longer exists".to_string()),
            (Some(src), Some(dst)) if src.currency != dst.currency => {
                Some("currency mismatch between accounts".to_string())
            }
            (Some(src), _) if src.balance < approved.amount => Some(format!(
                "insufficient funds at settlement: balance {}, amount {}",
                src.balance, approved.amount
            )),
            _ => None,
        };

        let outcome = if let Some(reason) = failure {
            if source.is_some() {
                Self::release_hold(&mut tx, approved.source_account_id, approved.amount).await?;
            }
            Self::mark_failed(&mut tx, transaction_id, &reason, now)
                .await?
                .map(SettleOutcome::Failed)
        } else {
            sqlx::query(
                r#"
                UPDATE accounts
                SET balance = balance - $2, held_balance = GREATEST(held_balance - $2, 0)
                WHERE account_id = $1
                "#,
            )
            .bind(approved.source_account_id)
            .bind(approved.amount)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE accounts SET balance = balance + $2 WHERE account_id = $1")
                .bind(approved.destination_account_id)
                .bind(approved.amount)
                .execute(&mut *tx)
                .await?;

            sqlx::query_as::<_, Transaction>(
                r#"
                UPDATE transactions
                SET status = 'completed', settled_utc = $2
                WHERE transaction_id = $1 AND status = 'approved'
                RETURNING transaction_id, source_account_id, destination_account_id, amount, currency,
                          idempotency_key, description, status, created_by, created_utc,
                          decided_by, decided_utc, settled_utc, failure_reason
                "#,
            )
            .bind(transaction_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?
            .map(SettleOutcome::Completed)
        };

        tx.commit().await?;
        record_db_query("settle_approved", started);
        Ok(outcome)
    }

    #[instrument(skip(self, reason))]
    async fn fail_approved(
        &self,
        transaction_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let failed = Self::mark_failed(&mut tx, transaction_id, reason, now).await?;
        match failed {
            Some(failed) => {
                Self::release_hold(&mut tx, failed.source_account_id, failed.amount).await?;
                tx.commit().await?;
                Ok(Some(failed))
            }
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, filter))]
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, source_account_id, destination_account_id, amount, currency,
                   idempotency_key, description, status, created_by, created_utc,
                   decided_by, decided_utc, settled_utc, failure_reason
            FROM transactions
            WHERE ($1::varchar IS NULL OR status = $1)
              AND ($2::uuid[] IS NULL
                   OR source_account_id = ANY($2)
                   OR destination_account_id = ANY($2))
            ORDER BY created_utc DESC
            LIMIT $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.account_ids.clone())
        .bind(filter.limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(transactions)
    }

    #[instrument(skip(self))]
    async fn summarize_by_status(&self) -> Result<Vec<StatusSummary>, StoreError> {
        let summaries = sqlx::query_as::<_, StatusSummary>(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(amount), 0)::BIGINT AS total_amount
            FROM transactions
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }
}

#[async_trait]
impl AuditStore for Database {
    #[instrument(skip(self, entry), fields(action = %entry.action))]
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (entry_id, actor_id, action, subject_type, subject_id, outcome, metadata, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.subject_type)
        .bind(&entry.subject_id)
        .bind(&entry.outcome)
        .bind(&entry.metadata)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, entry_id = %entry.entry_id, "Failed to append audit entry");
            StoreError::Database(e)
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_audit_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT entry_id, actor_id, action, subject_type, subject_id, outcome, metadata, created_utc
            FROM audit_log
            WHERE subject_type = $1 AND subject_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(subject_type)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[async_trait]
impl Store for Database {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
