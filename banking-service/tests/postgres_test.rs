//! Store invariants against a real Postgres.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p banking-service -- --ignored

mod common;

use banking_service::models::{Decision, Role, TransactionStatus};
use banking_service::services::store::{Store, TransactionStore};
use banking_service::services::{Database, TxError};
use banking_service::AppState;
use common::{account, create_account, create_identity, password, spawn_app_with_store, test_config, transfer};
use std::sync::Arc;
use uuid::Uuid;

async fn spawn_pg_app() -> (AppState, Arc<Database>) {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run Postgres tests");
    let database = Arc::new(
        Database::new(&database_url, 10)
            .await
            .expect("Failed to connect to test database"),
    );
    database
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    let state = spawn_app_with_store(test_config(), database.clone());
    (state, database)
}

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@bank.test", prefix, Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn concurrent_holds_never_overdraw_in_postgres() {
    let (state, db) = spawn_pg_app().await;
    let alice_email = unique_email("alice");
    let alice = create_identity(db.as_ref(), &alice_email, Role::Client).await;
    let bob = create_identity(db.as_ref(), &unique_email("bob"), Role::Client).await;
    let source = create_account(db.as_ref(), alice.identity_id, 1_000).await;
    let destination = create_account(db.as_ref(), bob.identity_id, 0).await;

    let (_, tokens) = state.auth.login(&alice_email, password(), None).await.unwrap();
    let principal = state.tokens.validate_access(&tokens.access_token).await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = state.transactions.clone();
            let principal = principal.clone();
            let command = transfer(&source, &destination, 200, &Uuid::new_v4().to_string());
            tokio::spawn(async move { engine.create_transfer(&principal, command).await })
        })
        .collect();

    let created = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(Ok(_))))
        .count();

    assert_eq!(created, 5);
    let source_after = account(db.as_ref(), source.account_id).await;
    assert_eq!(source_after.held_balance, 1_000);
}

#[tokio::test]
#[ignore]
async fn concurrent_decisions_have_one_winner_in_postgres() {
    let (state, db) = spawn_pg_app().await;
    let alice_email = unique_email("alice");
    let admin_email = unique_email("admin");
    let alice = create_identity(db.as_ref(), &alice_email, Role::Client).await;
    let bob = create_identity(db.as_ref(), &unique_email("bob"), Role::Client).await;
    create_identity(db.as_ref(), &admin_email, Role::Admin).await;
    let source = create_account(db.as_ref(), alice.identity_id, 1_000).await;
    let destination = create_account(db.as_ref(), bob.identity_id, 0).await;

    let (_, tokens) = state.auth.login(&alice_email, password(), None).await.unwrap();
    let client = state.tokens.validate_access(&tokens.access_token).await.unwrap();
    let (_, tokens) = state.auth.login(&admin_email, password(), None).await.unwrap();
    let admin = state.tokens.validate_access(&tokens.access_token).await.unwrap();

    let tx = state
        .transactions
        .create_transfer(
            &client,
            transfer(&source, &destination, 400, &Uuid::new_v4().to_string()),
        )
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = state.transactions.clone();
            let admin = admin.clone();
            let decision = if i % 2 == 0 {
                Decision::Approve
            } else {
                Decision::Reject
            };
            tokio::spawn(async move { engine.decide(tx.transaction_id, &admin, decision).await })
        })
        .collect();

    let mut winners = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => winners += 1,
            Err(TxError::AlreadyDecided(_)) => {}
            Err(other) => panic!("unexpected decision error: {other}"),
        }
    }
    assert_eq!(winners, 1);

    let stored = db
        .find_transaction(tx.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        stored.status,
        TransactionStatus::Completed | TransactionStatus::Rejected
    ));
    assert_eq!(account(db.as_ref(), source.account_id).await.held_balance, 0);
    assert!(db.ping().await.is_ok());
}
