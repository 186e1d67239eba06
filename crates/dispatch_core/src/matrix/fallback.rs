//! Haversine fallback matrix.
//!
//! Produced whenever the cache and the routing engine are both unable to
//! supply a real matrix. Distances are great-circle; durations assume a
//! constant fallback speed. Never written back to the cache.

use super::TravelMatrix;
use crate::spatial::{haversine_km, GeoPoint};

/// Pure haversine matrix. Distances in metres, durations in seconds at
/// `speed_kmh`.
pub fn haversine_matrix(coords: &[GeoPoint], speed_kmh: f64) -> TravelMatrix {
    let n = coords.len();
    let mut matrix = TravelMatrix::zero(n);
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let km = haversine_km(coords[i], coords[j]);
            matrix.distances[i][j] = km * 1000.0;
            matrix.durations[i][j] = (km / speed_kmh) * 3600.0;
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_is_zero() {
        let coords = [
            GeoPoint::new(52.52, 13.405),
            GeoPoint::new(52.50, 13.37),
            GeoPoint::new(52.48, 13.44),
        ];
        let m = haversine_matrix(&coords, 30.0);
        for i in 0..3 {
            assert_eq!(m.distances[i][i], 0.0);
            assert_eq!(m.durations[i][i], 0.0);
        }
    }

    #[test]
    fn duration_follows_the_speed_formula() {
        let coords = [GeoPoint::new(52.52, 13.405), GeoPoint::new(52.50, 13.37)];
        let m = haversine_matrix(&coords, 30.0);
        let km = m.distances[0][1] / 1000.0;
        let expected_secs = (km / 30.0) * 3600.0;
        assert!((m.durations[0][1] - expected_secs).abs() < 1e-6);
    }

    #[test]
    fn haversine_matrix_is_symmetric() {
        let coords = [GeoPoint::new(52.52, 13.405), GeoPoint::new(52.50, 13.37)];
        let m = haversine_matrix(&coords, 30.0);
        assert!((m.distances[0][1] - m.distances[1][0]).abs() < 1e-9);
    }
}
