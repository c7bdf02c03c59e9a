//! Request guard pipeline: admission, authentication, identity admission,
//! then the role gate. Each step either lets the request through or ends it
//! with the error for that step.

use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::client_ip;
use std::net::SocketAddr;

use crate::models::{AuditAction, AuditEntry, AuditOutcome, Principal, SubjectType};
use crate::services::{authorize, metrics, Admission, Capability, RateLimiter};
use crate::AppState;

/// Which bucket a route draws from, and what it is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// Login limiter keyed by client address, before authentication.
    LoginByClient,
    /// Transfer limiter keyed by the authenticated identity.
    TransferByIdentity,
}

#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    pub throttle: Option<Throttle>,
    pub capability: Option<Capability>,
}

impl RoutePolicy {
    pub const fn public(throttle: Option<Throttle>) -> Self {
        Self {
            throttle,
            capability: None,
        }
    }

    pub const fn requires(capability: Capability) -> Self {
        Self {
            throttle: None,
            capability: Some(capability),
        }
    }

    pub const fn throttled(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }
}

pub async fn guard_middleware(
    State((state, policy)): State<(AppState, RoutePolicy)>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if policy.throttle == Some(Throttle::LoginByClient) {
        let connect_info = req.extensions().get::<ConnectInfo<SocketAddr>>();
        let key = client_ip(req.headers(), connect_info)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        admit(&state.login_limiter, &key)?;
    }

    if let Some(capability) = policy.capability {
        let principal = authenticate(&state, req.headers()).await?;

        if policy.throttle == Some(Throttle::TransferByIdentity) {
            admit(&state.transfer_limiter, &principal.identity_id.to_string())?;
        }

        // Nested routers see a stripped path; audit the one the client sent.
        let path = req
            .extensions()
            .get::<OriginalUri>()
            .map(|uri| uri.path().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        authorize_capability(&state, &principal, capability, &path).await?;

        req.extensions_mut().insert(principal);
    }

    Ok(next.run(req).await)
}

fn admit(limiter: &RateLimiter, key: &str) -> Result<(), AppError> {
    match limiter.check(key) {
        Admission::Allowed => Ok(()),
        Admission::Denied { retry_after_secs } => {
            metrics::admission_denied(limiter.scope());
            tracing::warn!(
                scope = limiter.scope(),
                retry_after_secs = retry_after_secs,
                "Admission denied"
            );
            Err(AppError::TooManyRequests(
                "Rate limit exceeded. Please try again later.".to_string(),
                Some(retry_after_secs),
            ))
        }
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    Ok(state.tokens.validate_access(token).await?)
}

async fn authorize_capability(
    state: &AppState,
    principal: &Principal,
    capability: Capability,
    path: &str,
) -> Result<(), AppError> {
    if authorize(principal, capability.required_roles()) {
        return Ok(());
    }

    metrics::access_denied();
    tracing::warn!(
        identity_id = %principal.identity_id,
        role = %principal.role,
        capability = capability.as_str(),
        path = %path,
        "Access denied"
    );
    state
        .audit
        .record(
            AuditEntry::new(
                Some(principal.identity_id),
                AuditAction::AccessDenied,
                SubjectType::Route,
                path,
                AuditOutcome::Denied,
            )
            .with_metadata(json!({
                "capability": capability.as_str(),
                "role": principal.role.as_str(),
            })),
        )
        .await;

    Err(AppError::Forbidden(anyhow::anyhow!(
        "Insufficient permissions"
    )))
}
