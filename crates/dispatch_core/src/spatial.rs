//! Spatial primitives: geographic coordinates and great-circle distances.
//!
//! Every engine measures proximity with the haversine formula; the result is
//! cached in a global LRU because the dispatch and reassignment scorers ask
//! for the same driver/pickup pairs many times per cycle.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Uncached haversine distance (internal use).
fn haversine_km_uncached(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Cache key: coordinates quantized to micro-degrees (~0.1 m), so float noise
/// from repeated deserialization does not fragment the cache.
type QuantizedPair = ((i64, i64), (i64, i64));

fn quantize(p: GeoPoint) -> (i64, i64) {
    ((p.lat * 1e6).round() as i64, (p.lng * 1e6).round() as i64)
}

/// Global distance cache (10,000 entries).
fn distance_cache() -> &'static Mutex<LruCache<QuantizedPair, f64>> {
    static CACHE: OnceLock<Mutex<LruCache<QuantizedPair, f64>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(10_000).expect("cache size must be non-zero"),
        ))
    })
}

/// Haversine distance between two points with LRU caching.
///
/// Uses a symmetric key (smaller point first) to maximize cache hits.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (qa, qb) = (quantize(a), quantize(b));
    let key = if qa < qb { (qa, qb) } else { (qb, qa) };

    let mut cache = distance_cache().lock().unwrap();
    *cache.get_or_insert(key, || haversine_km_uncached(a, b))
}

/// Arithmetic centroid of a point set. Adequate at city scale; batches never
/// span more than a few kilometres.
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lng) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
    Some(GeoPoint::new(lat / n, lng / n))
}
