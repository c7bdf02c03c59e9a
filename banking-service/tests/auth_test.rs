//! Login, lockout, rotation and revocation against the in-memory backends.

mod common;

use async_trait::async_trait;
use banking_service::models::{Principal, Role};
use banking_service::services::store::SessionStore;
use banking_service::services::{AuthError, RevocationCache};
use banking_service::utils::Password;
use common::{
    create_identity, password, spawn_app, spawn_app_with, spawn_app_with_cache, test_config,
    TestApp,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn login_issues_tokens_carrying_identity_and_role() {
    let app = spawn_app();
    let admin = create_identity(app.store(), "admin@bank.test", Role::Admin).await;

    let (identity, tokens) = app
        .state
        .auth
        .login("Admin@Bank.test", password(), None)
        .await
        .unwrap();
    assert_eq!(identity.identity_id, admin.identity_id);

    let principal = app
        .state
        .tokens
        .validate_access(&tokens.access_token)
        .await
        .unwrap();
    assert_eq!(principal.identity_id, admin.identity_id);
    assert_eq!(principal.role, Role::Admin);
    assert_eq!(principal.session_id, tokens.session_id);

    let actions = app.audit_actions(&admin.identity_id.to_string());
    assert_eq!(actions, vec!["login_succeeded"]);
    let session_actions = app.audit_actions(&tokens.session_id.to_string());
    assert_eq!(session_actions, vec!["token_issued"]);
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_indistinguishable() {
    let app = spawn_app();
    create_identity(app.store(), "client@bank.test", Role::Client).await;

    let unknown = app
        .state
        .auth
        .login("nobody@bank.test", password(), None)
        .await;
    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));

    let wrong = app
        .state
        .auth
        .login(
            "client@bank.test",
            Password::new("not-the-password".to_string()),
            None,
        )
        .await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn lockout_rejects_correct_password_until_window_elapses() {
    let mut config = test_config();
    config.lockout.max_failed_attempts = 3;
    config.lockout.lockout_duration_seconds = 1;
    let app = spawn_app_with(config);
    let client = create_identity(app.store(), "client@bank.test", Role::Client).await;
    let wrong = || Password::new("guess".to_string());

    for _ in 0..2 {
        let result = app.state.auth.login("client@bank.test", wrong(), None).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
    let third = app.state.auth.login("client@bank.test", wrong(), None).await;
    assert!(matches!(third, Err(AuthError::Locked)));

    let correct = app
        .state
        .auth
        .login("client@bank.test", password(), None)
        .await;
    assert!(matches!(correct, Err(AuthError::Locked)));

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let after_window = app
        .state
        .auth
        .login("client@bank.test", password(), None)
        .await;
    assert!(after_window.is_ok());

    let actions = app.audit_actions(&client.identity_id.to_string());
    assert_eq!(
        actions,
        vec![
            "login_failed",
            "login_failed",
            "login_locked",
            "login_locked",
            "login_succeeded"
        ]
    );
}

#[tokio::test]
async fn successful_login_resets_failure_count() {
    let mut config = test_config();
    config.lockout.max_failed_attempts = 3;
    let app = spawn_app_with(config);
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let wrong = || Password::new("guess".to_string());

    for _ in 0..2 {
        let _ = app.state.auth.login("client@bank.test", wrong(), None).await;
    }
    app.login("client@bank.test").await;

    for _ in 0..2 {
        let result = app.state.auth.login("client@bank.test", wrong(), None).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
}

#[tokio::test]
async fn reusing_a_rotated_refresh_token_revokes_the_chain() {
    let app = spawn_app();
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let original = app.login("client@bank.test").await;

    let rotated = app
        .state
        .auth
        .refresh(&original.refresh_token)
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token, original.refresh_token);
    assert_eq!(rotated.session_id, original.session_id);
    assert!(app
        .state
        .tokens
        .validate_access(&rotated.access_token)
        .await
        .is_ok());

    let replay = app.state.auth.refresh(&original.refresh_token).await;
    assert!(matches!(replay, Err(AuthError::ReuseDetected)));

    let successor = app.state.auth.refresh(&rotated.refresh_token).await;
    assert!(matches!(successor, Err(AuthError::Revoked)));

    let access = app
        .state
        .tokens
        .validate_access(&rotated.access_token)
        .await;
    assert!(matches!(access, Err(AuthError::Revoked)));

    let actions = app.audit_actions(&original.session_id.to_string());
    assert!(actions.contains(&"token_rotated".to_string()));
    assert!(actions.contains(&"token_reuse_detected".to_string()));
}

#[tokio::test]
async fn concurrent_rotation_of_one_token_has_a_single_winner() {
    let app = spawn_app();
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let tokens = app.login("client@bank.test").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let auth = app.state.auth.clone();
            let token = tokens.refresh_token.clone();
            tokio::spawn(async move { auth.refresh(&token).await })
        })
        .collect();

    let mut winners = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => winners += 1,
            Err(AuthError::ReuseDetected) | Err(AuthError::Revoked) => {}
            Err(other) => panic!("unexpected rotation error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn logout_revokes_access_and_refresh_tokens() {
    let app = spawn_app();
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let (tokens, principal) = app.login_principal("client@bank.test").await;

    app.state.auth.logout(&principal).await.unwrap();

    let access = app.state.tokens.validate_access(&tokens.access_token).await;
    assert!(matches!(access, Err(AuthError::Revoked)));
    let refresh = app.state.auth.refresh(&tokens.refresh_token).await;
    assert!(matches!(refresh, Err(AuthError::Revoked)));

    let actions = app.audit_actions(&tokens.session_id.to_string());
    assert!(actions.ends_with(&["token_revoked".to_string(), "logout".to_string()]));
}

#[tokio::test]
async fn malformed_and_unknown_refresh_tokens_are_rejected() {
    let app = spawn_app();

    let malformed = app.state.auth.refresh("not-a-refresh-token").await;
    assert!(matches!(malformed, Err(AuthError::Malformed)));

    let unknown = app.state.auth.refresh(&"ab".repeat(32)).await;
    assert!(matches!(unknown, Err(AuthError::Revoked)));

    let access = app.state.tokens.validate_access("garbage").await;
    assert!(matches!(access, Err(AuthError::Malformed)));

    assert_eq!(refresh_denials(&app), vec!["malformed", "unknown_token"]);
}

/// Reasons recorded for refused refresh exchanges, oldest first.
fn refresh_denials(app: &TestApp) -> Vec<String> {
    app.store
        .audit_entries()
        .unwrap()
        .into_iter()
        .filter(|entry| entry.action == "refresh_denied")
        .inspect(|entry| assert_eq!(entry.outcome, "denied"))
        .filter_map(|entry| entry.metadata?["reason"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn expired_refresh_tokens_are_rejected_and_audited() {
    let mut config = test_config();
    config.jwt.refresh_token_ttl_days = 0;
    let app = spawn_app_with(config);
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let tokens = app.login("client@bank.test").await;

    let result = app.state.auth.refresh(&tokens.refresh_token).await;
    assert!(matches!(result, Err(AuthError::Expired)));

    assert_eq!(refresh_denials(&app), vec!["expired"]);
    let actions = app.audit_actions(&tokens.session_id.to_string());
    assert_eq!(actions.last().map(String::as_str), Some("refresh_denied"));
}

#[tokio::test]
async fn refreshing_a_logged_out_session_is_denied() {
    let app = spawn_app();
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let (tokens, principal) = app.login_principal("client@bank.test").await;
    app.state.auth.logout(&principal).await.unwrap();

    let result = app.state.auth.refresh(&tokens.refresh_token).await;
    assert!(matches!(result, Err(AuthError::Revoked)));
    assert_eq!(refresh_denials(&app), vec!["revoked"]);
}

/// Revocation cache that never answers in time.
struct StalledCache;

#[async_trait]
impl RevocationCache for StalledCache {
    async fn revoke_session(&self, _session_id: Uuid, _ttl: Duration) -> Result<(), anyhow::Error> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn is_session_revoked(&self, _session_id: Uuid) -> Result<bool, anyhow::Error> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(false)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[tokio::test]
async fn stalled_revocation_cache_fails_closed() {
    let mut config = test_config();
    config.timeouts.cache_timeout_ms = 50;
    let app = spawn_app_with_cache(config, Arc::new(StalledCache));
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let tokens = app.login("client@bank.test").await;

    let result = app.state.tokens.validate_access(&tokens.access_token).await;
    assert!(matches!(result, Err(AuthError::Unavailable)));
}

#[tokio::test]
async fn logout_is_recorded_even_when_the_cache_is_unreachable() {
    let mut config = test_config();
    config.timeouts.cache_timeout_ms = 50;
    let app = spawn_app_with_cache(config, Arc::new(StalledCache));
    let identity = create_identity(app.store(), "client@bank.test", Role::Client).await;
    let tokens = app.login("client@bank.test").await;
    let principal = Principal {
        identity_id: identity.identity_id,
        role: Role::Client,
        session_id: tokens.session_id,
        token_id: Uuid::new_v4(),
        expires_at: tokens.expires_at,
    };

    let result = app.state.auth.logout(&principal).await;
    assert!(matches!(result, Err(AuthError::Unavailable)));

    let session = app
        .store()
        .find_session(tokens.session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(session.is_revoked());

    let actions = app.audit_actions(&tokens.session_id.to_string());
    assert!(actions.ends_with(&["token_revoked".to_string(), "logout".to_string()]));
    let refresh = app.state.auth.refresh(&tokens.refresh_token).await;
    assert!(matches!(refresh, Err(AuthError::Revoked)));
}
