pub mod metrics;
pub mod rate_limit;
pub mod security_headers;
pub mod tracing;

pub use metrics::metrics_middleware;
pub use rate_limit::{
    client_ip, create_ip_rate_limiter, create_keyed_rate_limiter, ip_rate_limit_middleware,
    retry_after_secs, IpRateLimiter, KeyedRateLimiter,
};
pub use security_headers::security_headers_middleware;
pub use tracing::{request_id_middleware, REQUEST_ID_HEADER};
