use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Shared set of revoked session ids, consulted on every access-token
/// validation so a revocation takes effect on all instances at once.
/// Entries live as long as an access token can, then expire on their own.
#[async_trait]
pub trait RevocationCache: Send + Sync {
    async fn revoke_session(&self, session_id: Uuid, ttl: Duration) -> Result<(), anyhow::Error>;
    async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;

    /// Drop entries whose TTL has lapsed. Backends with native expiry keep
    /// the no-op.
    async fn purge_expired(&self) -> usize {
        0
    }
}

fn session_key(session_id: Uuid) -> String {
    format!("revoked:session:{}", session_id)
}

#[derive(Clone)]
pub struct RedisRevocationCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisRevocationCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own after a dropped connection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl RevocationCache for RedisRevocationCache {
    async fn revoke_session(&self, session_id: Uuid, ttl: Duration) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(session_key(session_id))
            .arg("1")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to record session revocation: {}", e))
    }

    async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check session revocation: {}", e))?;
        Ok(exists)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// Single-process revocation set for dev mode and tests.
#[derive(Default)]
pub struct InMemoryRevocationCache {
    revoked: DashMap<Uuid, Instant>,
}

impl InMemoryRevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

#[async_trait]
impl RevocationCache for InMemoryRevocationCache {
    async fn revoke_session(&self, session_id: Uuid, ttl: Duration) -> Result<(), anyhow::Error> {
        self.revoked.insert(session_id, Instant::now() + ttl);
        Ok(())
    }

    async fn is_session_revoked(&self, session_id: Uuid) -> Result<bool, anyhow::Error> {
        let now = Instant::now();
        let live = self
            .revoked
            .get(&session_id)
            .map(|expires| *expires > now)
            .unwrap_or(false);
        if !live {
            self.revoked.remove_if(&session_id, |_, expires| *expires <= now);
        }
        Ok(live)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.revoked.len();
        self.revoked.retain(|_, expires| *expires > now);
        before.saturating_sub(self.revoked.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_revocation_expires() {
        let cache = InMemoryRevocationCache::new();
        let session = Uuid::new_v4();
        assert!(!cache.is_session_revoked(session).await.unwrap());

        cache
            .revoke_session(session, Duration::from_millis(30))
            .await
            .unwrap();
        assert!(cache.is_session_revoked(session).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.is_session_revoked(session).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_drops_only_lapsed_entries() {
        let cache = InMemoryRevocationCache::new();
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();
        cache
            .revoke_session(stale, Duration::from_millis(20))
            .await
            .unwrap();
        cache
            .revoke_session(live, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_session_revoked(live).await.unwrap());
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[test]
    fn test_session_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            session_key(id),
            "revoked:session:00000000-0000-0000-0000-000000000000"
        );
    }
}
