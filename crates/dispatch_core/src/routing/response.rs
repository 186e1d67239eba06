//! Wire types for the table service.

use serde::Deserialize;

/// Raw `/table` response. `code` is `"Ok"` on success; any other value is
/// treated as failure regardless of HTTP status.
#[derive(Debug, Deserialize)]
pub struct TableResponse {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub distances: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub durations: Option<Vec<Vec<f64>>>,
}
