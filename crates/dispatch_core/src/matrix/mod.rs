//! Travel-matrix cache: content-addressed caching of routing-engine matrix
//! calls with graceful degradation to a haversine estimate.
//!
//! Lookup chain: fingerprint → shared KV → external routing engine →
//! haversine fallback. A failure anywhere in the chain degrades to the next
//! step; `get_matrix` itself is infallible.

pub mod cache;
pub mod fallback;
pub mod fingerprint;

pub use cache::MatrixCache;
pub use fallback::haversine_matrix;
pub use fingerprint::matrix_fingerprint;

use serde::{Deserialize, Serialize};

/// Pairwise travel distances (metres) and durations (seconds) over an
/// ordered coordinate list. `distances[i][j]` is the leg from point `i` to
/// point `j`. No symmetry is assumed; the cache passes through whatever the
/// routing engine reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelMatrix {
    pub distances: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
}

impl TravelMatrix {
    /// The n×n zero matrix. A single-point request short-circuits to this.
    pub fn zero(n: usize) -> Self {
        Self {
            distances: vec![vec![0.0; n]; n],
            durations: vec![vec![0.0; n]; n],
        }
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_matrix_shape() {
        let m = TravelMatrix::zero(3);
        assert_eq!(m.len(), 3);
        assert!(m.distances.iter().flatten().all(|v| *v == 0.0));
        assert!(m.durations.iter().flatten().all(|v| *v == 0.0));
    }
}
