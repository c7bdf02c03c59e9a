//! End-to-end checks through the router: guard pipeline, status mapping and
//! response shapes.

mod common;

use axum::http::{header, Method, StatusCode};
use banking_service::models::Role;
use common::{create_identity, json_request, read_json, spawn_app, PASSWORD};
use serde_json::json;
use tower::util::ServiceExt;

#[tokio::test]
async fn health_endpoint_sets_security_headers_and_request_id() {
    let app = spawn_app();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert!(headers.get("x-request-id").is_some());

    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn readiness_reports_both_backends() {
    let app = spawn_app();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/ready", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["store"], true);
    assert_eq!(body["revocation_cache"], true);
}

#[tokio::test]
async fn login_over_http_returns_bearer_tokens() {
    let app = spawn_app();
    let admin = create_identity(app.store(), "admin@bank.test", Role::Admin).await;

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "admin@bank.test", "password": PASSWORD })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["identity_id"], admin.identity_id.to_string());
    assert_eq!(body["role"], "admin");
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].as_str().is_some());
    assert!(body["refresh_token"].as_str().is_some());
}

#[tokio::test]
async fn login_attempts_are_throttled_per_client() {
    let app = spawn_app();
    create_identity(app.store(), "client@bank.test", Role::Client).await;
    let router = app.router();

    for _ in 0..5 {
        let response = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "email": "nobody@bank.test", "password": "wrong" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let throttled = router
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "client@bank.test", "password": PASSWORD })),
        ))
        .await
        .unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.headers().get(header::RETRY_AFTER).is_some());
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let app = spawn_app();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/api/v1/client/accounts", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let garbage = app
        .router()
        .oneshot(json_request(
            Method::GET,
            "/api/v1/client/accounts",
            Some("not-a-jwt"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn clients_are_denied_admin_routes_and_the_denial_is_audited() {
    let app = spawn_app();
    let (client, _) = app.client_with_account("alice@bank.test", 100).await;
    let tokens = app.login("alice@bank.test").await;

    let response = app
        .router()
        .oneshot(json_request(
            Method::GET,
            "/api/v1/admin/transactions",
            Some(&tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let denials: Vec<_> = app
        .store
        .audit_entries()
        .unwrap()
        .into_iter()
        .filter(|entry| entry.action == "access_denied")
        .collect();
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].actor_id, Some(client.identity_id));
    assert_eq!(
        denials[0].subject_id.as_deref(),
        Some("/api/v1/admin/transactions")
    );
}

#[tokio::test]
async fn admins_cannot_create_transfers() {
    let app = spawn_app();
    create_identity(app.store(), "admin@bank.test", Role::Admin).await;
    let tokens = app.login("admin@bank.test").await;

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/client/payments/transfer",
            Some(&tokens.access_token),
            Some(json!({
                "from_account": uuid::Uuid::new_v4(),
                "to_account": uuid::Uuid::new_v4(),
                "amount": 10,
                "idempotency_key": "admin-try",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn transfer_lifecycle_over_http() {
    let app = spawn_app();
    let (_, source) = app.client_with_account("alice@bank.test", 1_000).await;
    let (_, destination) = app.client_with_account("bob@bank.test", 0).await;
    create_identity(app.store(), "admin@bank.test", Role::Admin).await;
    let client_tokens = app.login("alice@bank.test").await;
    let admin_tokens = app.login("admin@bank.test").await;

    let body = json!({
        "from_account": source.account_id,
        "to_account": destination.account_id,
        "amount": 300,
        "idempotency_key": "http-k1",
        "description": "  rent  ",
    });

    let created = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/client/payments/transfer",
            Some(&client_tokens.access_token),
            Some(body.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::OK);
    let created = read_json(created).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["description"], "rent");
    let transaction_id = created["transaction_id"].as_str().unwrap().to_string();

    let replay = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/client/payments/transfer",
            Some(&client_tokens.access_token),
            Some(body),
        ))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(read_json(replay).await["transaction_id"], transaction_id.as_str());

    let too_much = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/client/payments/transfer",
            Some(&client_tokens.access_token),
            Some(json!({
                "from_account": source.account_id,
                "to_account": destination.account_id,
                "amount": 800,
                "idempotency_key": "http-k2",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(too_much.status(), StatusCode::PAYMENT_REQUIRED);

    let accounts = app
        .router()
        .oneshot(json_request(
            Method::GET,
            "/api/v1/client/accounts",
            Some(&client_tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(accounts.status(), StatusCode::OK);
    let accounts = read_json(accounts).await;
    assert_eq!(accounts[0]["balance"], 1_000);
    assert_eq!(accounts[0]["available_balance"], 700);

    let approve_uri = format!("/api/v1/admin/transactions/{}/approve", transaction_id);
    let approved = app
        .router()
        .oneshot(json_request(
            Method::PUT,
            &approve_uri,
            Some(&admin_tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(approved.status(), StatusCode::OK);
    assert_eq!(read_json(approved).await["status"], "completed");

    let again = app
        .router()
        .oneshot(json_request(
            Method::PUT,
            &approve_uri,
            Some(&admin_tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let unknown = app
        .router()
        .oneshot(json_request(
            Method::PUT,
            &format!("/api/v1/admin/transactions/{}/reject", uuid::Uuid::new_v4()),
            Some(&admin_tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let trail = app
        .router()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/admin/transactions/{}/audit", transaction_id),
            Some(&admin_tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(trail.status(), StatusCode::OK);
    assert_eq!(read_json(trail).await.as_array().map(Vec::len), Some(3));

    let dashboard = app
        .router()
        .oneshot(json_request(
            Method::GET,
            "/api/v1/admin/dashboard",
            Some(&admin_tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(dashboard.status(), StatusCode::OK);
    assert_eq!(read_json(dashboard).await["pending_count"], 0);
}

#[tokio::test]
async fn invalid_transfer_bodies_are_rejected() {
    let app = spawn_app();
    let (_, source) = app.client_with_account("alice@bank.test", 1_000).await;
    let tokens = app.login("alice@bank.test").await;

    let zero = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/client/payments/transfer",
            Some(&tokens.access_token),
            Some(json!({
                "from_account": source.account_id,
                "to_account": uuid::Uuid::new_v4(),
                "amount": 0,
                "idempotency_key": "zero",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let malformed = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/client/payments/transfer",
            Some(&tokens.access_token),
            Some(json!({ "amount": "lots" })),
        ))
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_invalidates_the_session_over_http() {
    let app = spawn_app();
    app.client_with_account("alice@bank.test", 100).await;
    let tokens = app.login("alice@bank.test").await;

    let logout = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/logout",
            Some(&tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let after = app
        .router()
        .oneshot(json_request(
            Method::GET,
            "/api/v1/client/dashboard",
            Some(&tokens.access_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_token_reuse_is_rejected_over_http() {
    let app = spawn_app();
    app.client_with_account("alice@bank.test", 100).await;
    let tokens = app.login("alice@bank.test").await;
    let body = json!({ "refresh_token": tokens.refresh_token });

    let first = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(body.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let rotated = read_json(first).await;
    assert_ne!(rotated["refresh_token"], tokens.refresh_token.as_str());

    let reuse = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(body),
        ))
        .await
        .unwrap();
    assert_eq!(reuse.status(), StatusCode::UNAUTHORIZED);
}
