//! Session endpoints.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use service_core::error::AppError;
use service_core::middleware::client_ip;
use std::net::SocketAddr;

use crate::dtos::{LoginRequest, LoginResponse, RefreshRequest, TokenResponse};
use crate::middleware::AuthUser;
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let client = client_ip(&headers, connect_info.as_ref()).map(|ip| ip.to_string());

    let (identity, tokens) = state
        .auth
        .login(&req.email, Password::new(req.password), client.as_deref())
        .await?;

    Ok(Json(LoginResponse {
        identity_id: identity.identity_id,
        role: identity.role,
        tokens: tokens.into(),
    }))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let tokens = state.auth.refresh(req.refresh_token.trim()).await?;
    Ok(Json(tokens.into()))
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<StatusCode, AppError> {
    state.auth.logout(&principal).await?;
    Ok(StatusCode::NO_CONTENT)
}
