use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    NotUntil, Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

/// Rate limiter keyed by an arbitrary string (client address, identity id)
pub type KeyedRateLimiter = Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>;

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

fn per_minute_quota(per_minute: u32, burst: u32) -> Quota {
    let per_minute = NonZeroU32::new(per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
    Quota::per_minute(per_minute).allow_burst(burst)
}

/// Token bucket per key: `burst` capacity, refilled at `per_minute` tokens per minute.
pub fn create_keyed_rate_limiter(per_minute: u32, burst: u32) -> KeyedRateLimiter {
    Arc::new(RateLimiter::dashmap(per_minute_quota(per_minute, burst)))
}

/// Coarse per-IP limiter applied in front of every route.
pub fn create_ip_rate_limiter(per_minute: u32) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(per_minute_quota(per_minute, per_minute)))
}

/// Seconds until the denied key may try again, rounded up so clients never retry early.
pub fn retry_after_secs(negative: &NotUntil<<DefaultClock as Clock>::Instant>) -> u64 {
    let wait = negative.wait_time_from(DefaultClock::default().now());
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

/// Resolve the client address, preferring the first X-Forwarded-For hop.
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip()))
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    match ip {
        Some(ip) => match limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => Err(AppError::TooManyRequests(
                "Too many requests from this IP. Please try again later.".to_string(),
                Some(retry_after_secs(&negative)),
            )),
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}
