//! Content-addressed fingerprint over an ordered coordinate list.
//!
//! The digest keys the matrix cache: identical coordinate lists (after
//! 5-decimal rounding, `lng,lat` order, `;`-separated) always hash to the
//! same key, and any permutation hashes differently.

use sha1::{Digest, Sha1};

use crate::spatial::GeoPoint;

/// Key prefix in the shared KV store.
pub const KEY_PREFIX: &str = "mx:";

/// Canonical string form of a coordinate list: `lng,lat` pairs rounded to
/// 5 decimals (~1 m), joined with `;`.
fn canonical_coords(coords: &[GeoPoint]) -> String {
    coords
        .iter()
        .map(|p| format!("{:.5},{:.5}", p.lng, p.lat))
        .collect::<Vec<_>>()
        .join(";")
}

/// SHA-1 hex digest of the canonical coordinate string.
pub fn matrix_fingerprint(coords: &[GeoPoint]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_coords(coords));
    format!("{:x}", hasher.finalize())
}

/// Full KV key for a coordinate list.
pub fn cache_key(coords: &[GeoPoint]) -> String {
    format!("{KEY_PREFIX}{}", matrix_fingerprint(coords))
}
