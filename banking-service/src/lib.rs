pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::middleware::{
    create_ip_rate_limiter, ip_rate_limit_middleware, metrics_middleware, request_id_middleware,
    security_headers_middleware, IpRateLimiter, REQUEST_ID_HEADER,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::BankingConfig;
use crate::middleware::{guard_middleware, RoutePolicy, Throttle};
use crate::services::{
    AuditLog, AuthService, Capability, JwtService, RateLimiter, RevocationCache, Store,
    TokenService, TransactionEngine,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BankingConfig>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn RevocationCache>,
    pub audit: AuditLog,
    pub tokens: TokenService,
    pub auth: AuthService,
    pub transactions: TransactionEngine,
    pub login_limiter: RateLimiter,
    pub transfer_limiter: RateLimiter,
    pub ip_limiter: IpRateLimiter,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire every component from one immutable config.
    pub fn new(
        config: BankingConfig,
        store: Arc<dyn Store>,
        cache: Arc<dyn RevocationCache>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);
        let audit = AuditLog::new(store.clone());

        let jwt = JwtService::new(
            &config.jwt.secret,
            &config.jwt.issuer,
            config.access_token_ttl(),
        );
        let tokens = TokenService::new(
            jwt,
            store.clone(),
            cache.clone(),
            audit.clone(),
            config.refresh_token_ttl(),
            config.cache_timeout(),
        );
        let auth = AuthService::new(
            store.clone(),
            tokens.clone(),
            audit.clone(),
            config.lockout_policy(),
            config.request_timeout(),
        )?;
        let transactions = TransactionEngine::new(
            store.clone(),
            audit.clone(),
            config.request_timeout(),
            config.settlement_retry(),
        );

        let limits = &config.rate_limit;
        let login_limiter = RateLimiter::new("login", limits.login_per_minute, limits.login_burst);
        let transfer_limiter =
            RateLimiter::new("transfer", limits.transfer_per_minute, limits.transfer_burst);
        let ip_limiter = create_ip_rate_limiter(limits.global_ip_limit);

        Ok(Self {
            config,
            store,
            cache,
            audit,
            tokens,
            auth,
            transactions,
            login_limiter,
            transfer_limiter,
            ip_limiter,
            metrics,
        })
    }
}

fn guarded(state: &AppState, router: Router<AppState>, policy: RoutePolicy) -> Router<AppState> {
    router.layer(from_fn_with_state((state.clone(), policy), guard_middleware))
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .merge(guarded(
            &state,
            Router::new().route("/login", post(handlers::auth::login)),
            RoutePolicy::public(Some(Throttle::LoginByClient)),
        ))
        .route("/refresh", post(handlers::auth::refresh))
        .merge(guarded(
            &state,
            Router::new().route("/logout", post(handlers::auth::logout)),
            RoutePolicy::requires(Capability::EndSession),
        ));

    let client_routes = Router::new()
        .merge(guarded(
            &state,
            Router::new()
                .route("/accounts", get(handlers::client::list_accounts))
                .route("/transactions", get(handlers::client::list_transactions))
                .route("/dashboard", get(handlers::client::dashboard)),
            RoutePolicy::requires(Capability::ViewOwnAccounts),
        ))
        .merge(guarded(
            &state,
            Router::new().route(
                "/payments/transfer",
                post(handlers::client::create_transfer),
            ),
            RoutePolicy::requires(Capability::CreateTransfer)
                .throttled(Throttle::TransferByIdentity),
        ));

    let admin_routes = Router::new()
        .merge(guarded(
            &state,
            Router::new()
                .route("/transactions", get(handlers::admin::list_transactions))
                .route("/dashboard", get(handlers::admin::dashboard))
                .route(
                    "/transactions/:id/audit",
                    get(handlers::admin::audit_trail),
                ),
            RoutePolicy::requires(Capability::ReviewTransactions),
        ))
        .merge(guarded(
            &state,
            Router::new()
                .route("/transactions/:id/approve", put(handlers::admin::approve))
                .route("/transactions/:id/reject", put(handlers::admin::reject)),
            RoutePolicy::requires(Capability::DecideTransactions),
        ));

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect();

    let ip_limiter = state.ip_limiter.clone();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_endpoint))
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1/client", client_routes)
        .nest("/api/v1/admin", admin_routes)
        .with_state(state)
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}
