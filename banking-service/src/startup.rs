//! Application startup and lifecycle management.

use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

use crate::config::BankingConfig;
use crate::services::bootstrap::seed_demo_data;
use crate::services::{
    Database, InMemoryRevocationCache, MemoryStore, RedisRevocationCache, RevocationCache, Store,
};
use crate::{build_router, AppState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Connect the backends, recover unfinished settlements and bind the listener.
    pub async fn build(
        config: BankingConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        let store = connect_store(&config).await?;
        let cache = connect_cache(&config).await?;

        if let Some(password) = config.demo_seed_password.as_ref().filter(|_| !config.is_prod()) {
            seed_demo_data(store.as_ref(), password)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to seed demo data: {}", e);
                    AppError::InternalError(e)
                })?;
        }

        let bind_address = config.common.bind_address();
        let state = AppState::new(config, store, cache, metrics)?;

        match state.transactions.recover_stuck_settlements().await {
            Ok(0) => {}
            Ok(resolved) => tracing::warn!(resolved = resolved, "Resolved transfers left approved"),
            Err(e) => tracing::error!(error = %e, "Settlement recovery sweep failed"),
        }

        let listener = TcpListener::bind(&bind_address).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", bind_address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until SIGINT/SIGTERM, then drain in-flight requests for at most
    /// the configured grace period.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let grace = Duration::from_secs(self.state.config.common.shutdown_grace_seconds);
        spawn_sweeper(&self.state);

        let app = build_router(self.state);
        tracing::info!(port = self.port, "banking-service listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        let server = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop_tx.send(true);
        })
        .into_future();

        tokio::select! {
            result = server => result?,
            _ = drain_deadline(stop_rx, grace) => {
                tracing::warn!(grace_seconds = grace.as_secs(), "Drain period elapsed, closing remaining connections");
            }
        }

        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

async fn connect_store(config: &BankingConfig) -> Result<Arc<dyn Store>, AppError> {
    match &config.database.url {
        Some(url) => {
            let database = Database::new(url, config.database.max_connections).await?;
            database.run_migrations().await?;
            Ok(Arc::new(database))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn connect_cache(config: &BankingConfig) -> Result<Arc<dyn RevocationCache>, AppError> {
    match &config.redis.url {
        Some(url) => {
            let cache = RedisRevocationCache::new(url).await.map_err(|e| {
                tracing::error!("Failed to connect to Redis: {}", e);
                AppError::InternalError(e)
            })?;
            Ok(Arc::new(cache))
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process revocation cache");
            Ok(Arc::new(InMemoryRevocationCache::new()))
        }
    }
}

/// Periodically drop refilled limiter buckets and lapsed revocations.
fn spawn_sweeper(state: &AppState) {
    let login = state.login_limiter.clone();
    let transfer = state.transfer_limiter.clone();
    let ip = state.ip_limiter.clone();
    let cache = state.cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            login.retain_recent();
            transfer.retain_recent();
            ip.retain_recent();
            let purged = cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged lapsed session revocations");
            }
        }
    });
}

async fn drain_deadline(mut stop: watch::Receiver<bool>, grace: Duration) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
