//! KV-backed matrix cache with haversine degradation.

use std::sync::atomic::{AtomicBool, Ordering};

use redis::aio::ConnectionManager;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::fallback::haversine_matrix;
use super::fingerprint::cache_key;
use super::TravelMatrix;
use crate::config::MatrixConfig;
use crate::routing::TableClient;
use crate::spatial::GeoPoint;

pub struct MatrixCache {
    kv: Option<ConnectionManager>,
    router: TableClient,
    config: MatrixConfig,
    /// Set while the last fetch had to degrade. Observability only; callers
    /// never see the flag in the returned matrix.
    degraded: AtomicBool,
}

impl MatrixCache {
    pub fn new(kv: Option<ConnectionManager>, router: TableClient, config: MatrixConfig) -> Self {
        Self {
            kv,
            router,
            config,
            degraded: AtomicBool::new(false),
        }
    }

    /// Connect the shared KV. A connection failure is not fatal: the cache
    /// runs in pass-through mode and every request goes to the router.
    pub async fn connect_kv(redis_url: &str) -> Option<ConnectionManager> {
        let client = match redis::Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                warn!(%err, "invalid matrix KV URL, running without cache");
                return None;
            }
        };
        match ConnectionManager::new(client).await {
            Ok(manager) => Some(manager),
            Err(err) => {
                warn!(%err, "matrix KV unreachable, running without cache");
                None
            }
        }
    }

    /// Fetch the travel matrix for an ordered coordinate list.
    ///
    /// Never fails: cache errors degrade to a direct router call, router
    /// errors degrade to a haversine matrix. The haversine result is never
    /// written back to the cache.
    pub async fn get_matrix(&self, coords: &[GeoPoint]) -> TravelMatrix {
        if coords.len() <= 1 {
            return TravelMatrix::zero(coords.len());
        }

        match timeout(self.config.fetch_timeout, self.fetch(coords)).await {
            Ok(Some(matrix)) => {
                self.degraded.store(false, Ordering::Relaxed);
                matrix
            }
            Ok(None) => {
                self.degraded.store(true, Ordering::Relaxed);
                haversine_matrix(coords, self.config.fallback_speed_kmh)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                    "matrix fetch timed out, using haversine fallback"
                );
                self.degraded.store(true, Ordering::Relaxed);
                haversine_matrix(coords, self.config.fallback_speed_kmh)
            }
        }
    }

    /// Whether the most recent fetch had to fall back.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn fetch(&self, coords: &[GeoPoint]) -> Option<TravelMatrix> {
        let key = cache_key(coords);

        if let Some(cached) = self.read_cache(&key).await {
            debug!(%key, "matrix cache hit");
            return Some(cached);
        }

        let matrix = match self.router.table(coords).await {
            Ok(matrix) => matrix,
            Err(err) => {
                warn!(%err, "routing engine matrix fetch failed");
                return None;
            }
        };

        self.write_cache(&key, &matrix).await;
        Some(matrix)
    }

    async fn read_cache(&self, key: &str) -> Option<TravelMatrix> {
        let mut conn = self.kv.clone()?;
        let raw: Option<String> = match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "matrix cache read failed, fetching directly");
                return None;
            }
        };
        match serde_json::from_str(&raw?) {
            Ok(matrix) => Some(matrix),
            Err(err) => {
                warn!(%err, "matrix cache entry undecodable, fetching directly");
                None
            }
        }
    }

    async fn write_cache(&self, key: &str, matrix: &TravelMatrix) {
        let Some(mut conn) = self.kv.clone() else {
            return;
        };
        let json = match serde_json::to_string(matrix) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "matrix not serializable, skipping cache write");
                return;
            }
        };
        let result: Result<(), _> = redis::cmd("SETEX")
            .arg(key)
            .arg(self.config.cache_ttl.as_secs())
            .arg(json)
            .query_async(&mut conn)
            .await;
        if let Err(err) = result {
            warn!(%err, "matrix cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn degraded_cache() -> MatrixCache {
        // No KV and an unreachable router: every fetch ends at haversine.
        let router = TableClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        MatrixCache::new(None, router, MatrixConfig::default())
    }

    #[tokio::test]
    async fn single_point_returns_the_zero_matrix() {
        let cache = degraded_cache();
        let matrix = cache.get_matrix(&[GeoPoint::new(52.52, 13.405)]).await;
        assert_eq!(matrix, TravelMatrix::zero(1));
    }

    #[tokio::test]
    async fn kv_and_router_failure_degrades_to_haversine() {
        let cache = degraded_cache();
        let coords = [GeoPoint::new(52.52, 13.405), GeoPoint::new(52.50, 13.37)];
        let matrix = cache.get_matrix(&coords).await;
        let expected = haversine_matrix(&coords, 30.0);
        assert_eq!(matrix, expected);
        assert!(cache.is_degraded());
    }

    #[tokio::test]
    async fn degraded_fetches_are_deterministic() {
        let cache = degraded_cache();
        let coords = [GeoPoint::new(52.52, 13.405), GeoPoint::new(52.50, 13.37)];
        let first = cache.get_matrix(&coords).await;
        let second = cache.get_matrix(&coords).await;
        assert_eq!(first, second);
    }
}
