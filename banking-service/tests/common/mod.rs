//! Shared fixtures for banking-service integration tests. Everything runs
//! against the in-memory store and in-process revocation cache.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use banking_service::config::BankingConfig;
use banking_service::models::{
    Account, AuditEntry, Identity, LockoutPolicy, NewTransfer, Principal, RefreshSession,
    RefreshTokenRecord, RevokeReason, Role, StatusSummary, Transaction, TransactionFilter,
};
use banking_service::services::store::{
    AccountStore, AuditStore, CreateOutcome, IdentityStore, SessionStore, SettleOutcome, Store,
    TransactionStore,
};
use banking_service::services::{
    InMemoryRevocationCache, MemoryStore, RevocationCache, StoreError, TokenPair,
    TransferCommand,
};
use chrono::{DateTime, Utc};
use banking_service::utils::{hash_password, Password};
use banking_service::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery-staple";

static INIT: Once = Once::new();
static PASSWORD_HASH: OnceLock<String> = OnceLock::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn,banking_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Dev defaults with a short settlement retry window.
pub fn test_config() -> BankingConfig {
    let mut config = BankingConfig::development();
    config.timeouts.settlement_retry_seconds = 1;
    config
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config())
}

pub fn spawn_app_with(config: BankingConfig) -> TestApp {
    spawn_app_with_cache(config, Arc::new(InMemoryRevocationCache::new()))
}

pub fn spawn_app_with_cache(config: BankingConfig, cache: Arc<dyn RevocationCache>) -> TestApp {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(config, store.clone(), cache, None)
        .expect("Failed to build application state");
    TestApp { state, store }
}

/// Build state over a caller-supplied store, e.g. one that injects faults.
pub fn spawn_app_with_store(config: BankingConfig, store: Arc<dyn Store>) -> AppState {
    init_tracing();
    AppState::new(config, store, Arc::new(InMemoryRevocationCache::new()), None)
        .expect("Failed to build application state")
}

fn password_hash() -> String {
    PASSWORD_HASH
        .get_or_init(|| {
            hash_password(&Password::new(PASSWORD.to_string()))
                .expect("Failed to hash password")
                .into_string()
        })
        .clone()
}

pub fn password() -> Password {
    Password::new(PASSWORD.to_string())
}

pub async fn create_identity(store: &dyn Store, email: &str, role: Role) -> Identity {
    let identity = Identity::new(email.to_string(), password_hash(), role);
    store
        .insert_identity(&identity)
        .await
        .expect("Failed to insert identity");
    identity
}

pub async fn create_account(store: &dyn Store, owner: Uuid, balance: i64) -> Account {
    create_account_in(store, owner, balance, "USD").await
}

pub async fn create_account_in(
    store: &dyn Store,
    owner: Uuid,
    balance: i64,
    currency: &str,
) -> Account {
    let account = Account::new(
        owner,
        format!("ACC-{}", &Uuid::new_v4().simple().to_string()[..8]),
        currency,
        balance,
    );
    store
        .insert_account(&account)
        .await
        .expect("Failed to insert account");
    account
}

pub async fn account(store: &dyn Store, account_id: Uuid) -> Account {
    store
        .find_account(account_id)
        .await
        .expect("Failed to load account")
        .expect("Account missing")
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// A client identity with one funded account.
    pub async fn client_with_account(&self, email: &str, balance: i64) -> (Identity, Account) {
        let identity = create_identity(self.store(), email, Role::Client).await;
        let account = create_account(self.store(), identity.identity_id, balance).await;
        (identity, account)
    }

    pub async fn login(&self, email: &str) -> TokenPair {
        let (_, tokens) = self
            .state
            .auth
            .login(email, password(), Some("127.0.0.1"))
            .await
            .expect("Login failed");
        tokens
    }

    pub async fn login_principal(&self, email: &str) -> (TokenPair, Principal) {
        let tokens = self.login(email).await;
        let principal = self
            .state
            .tokens
            .validate_access(&tokens.access_token)
            .await
            .expect("Fresh access token rejected");
        (tokens, principal)
    }

    pub fn audit_actions(&self, subject_id: &str) -> Vec<String> {
        self.store
            .audit_entries()
            .expect("Failed to read audit log")
            .into_iter()
            .filter(|entry| entry.subject_id.as_deref() == Some(subject_id))
            .map(|entry| entry.action)
            .collect()
    }
}

pub fn transfer(from: &Account, to: &Account, amount: i64, key: &str) -> TransferCommand {
    TransferCommand {
        from_account: from.account_id,
        to_account: to.account_id,
        amount,
        idempotency_key: key.to_string(),
        description: None,
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.10");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// MemoryStore wrapper that injects faults into selected calls.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    reject_settlement: bool,
    slow_audit: Option<(Duration, &'static [&'static str])>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            reject_settlement: false,
            slow_audit: None,
        }
    }

    /// Every settlement attempt fails with a store error.
    pub fn rejecting_settlement(mut self) -> Self {
        self.reject_settlement = true;
        self
    }

    /// Appending any of `actions` to the audit log stalls for `delay` first.
    pub fn slowing_audit(mut self, delay: Duration, actions: &'static [&'static str]) -> Self {
        self.slow_audit = Some((delay, actions));
        self
    }
}

#[async_trait]
impl IdentityStore for FaultyStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.inner.insert_identity(identity).await
    }

    async fn find_identity(&self, identity_id: Uuid) -> Result<Option<Identity>, StoreError> {
        self.inner.find_identity(identity_id).await
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        self.inner.find_identity_by_email(email).await
    }

    async fn record_login_failure(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<Identity, StoreError> {
        self.inner.record_login_failure(identity_id, now, policy).await
    }

    async fn reset_login_failures(&self, identity_id: Uuid) -> Result<(), StoreError> {
        self.inner.reset_login_failures(identity_id).await
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn create_session(
        &self,
        session: &RefreshSession,
        token: &RefreshTokenRecord,
    ) -> Result<(), StoreError> {
        self.inner.create_session(session, token).await
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<RefreshSession>, StoreError> {
        self.inner.find_session(session_id).await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshTokenRecord, RefreshSession)>, StoreError> {
        self.inner.find_refresh_token(token_hash).await
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_generation: i32,
        next: &RefreshTokenRecord,
    ) -> Result<Option<RefreshSession>, StoreError> {
        self.inner
            .rotate_session(session_id, expected_generation, next)
            .await
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.revoke_session(session_id, reason, now).await
    }
}

#[async_trait]
impl AccountStore for FaultyStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.inner.insert_account(account).await
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.find_account(account_id).await
    }

    async fn list_accounts_for_owner(&self, owner_id: Uuid) -> Result<Vec<Account>, StoreError> {
        self.inner.list_accounts_for_owner(owner_id).await
    }
}

#[async_trait]
impl TransactionStore for FaultyStore {
    async fn find_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction(transaction_id).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_by_idempotency_key(key).await
    }

    async fn create_pending(&self, transfer: &NewTransfer) -> Result<CreateOutcome, StoreError> {
        self.inner.create_pending(transfer).await
    }

    async fn approve_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.approve_pending(transaction_id, actor_id, now).await
    }

    async fn reject_pending(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.reject_pending(transaction_id, actor_id, now).await
    }

    async fn settle_approved(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SettleOutcome>, StoreError> {
        if self.reject_settlement {
            return Err(StoreError::Corrupt("ledger write rejected".to_string()));
        }
        self.inner.settle_approved(transaction_id, now).await
    }

    async fn fail_approved(
        &self,
        transaction_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.fail_approved(transaction_id, reason, now).await
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.list_transactions(filter).await
    }

    async fn summarize_by_status(&self) -> Result<Vec<StatusSummary>, StoreError> {
        self.inner.summarize_by_status().await
    }
}

#[async_trait]
impl AuditStore for FaultyStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if let Some((delay, actions)) = self.slow_audit {
            if actions.iter().any(|action| *action == entry.action) {
                tokio::time::sleep(delay).await;
            }
        }
        self.inner.append_audit(entry).await
    }

    async fn list_audit_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.list_audit_for_subject(subject_type, subject_id).await
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
