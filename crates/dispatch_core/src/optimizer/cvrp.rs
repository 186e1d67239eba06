//! HTTP client for the external CVRP solver service.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;

use crate::error::DispatchError;

#[derive(Debug, Clone, Serialize)]
pub struct CvrpPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CvrpTimeWindow {
    /// Epoch seconds.
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CvrpLocation {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub demand: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<CvrpTimeWindow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CvrpVehicle {
    pub id: String,
    pub capacity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CvrpRequest {
    pub depot: CvrpPoint,
    pub locations: Vec<CvrpLocation>,
    pub vehicles: Vec<CvrpVehicle>,
    #[serde(rename = "timeBudgetSec")]
    pub time_budget_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CvrpStop {
    pub location_index: usize,
    pub cumulative_load: f64,
    pub demand: f64,
    pub location_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CvrpRoute {
    pub stops: Vec<CvrpStop>,
    pub total_distance: f64,
    pub total_load: f64,
    pub capacity_utilization: f64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
}

#[derive(Debug, Deserialize)]
struct SolveResponse {
    routes: Vec<CvrpRoute>,
}

/// Thin HTTP client for the solver. The optimizer always probes health
/// before committing to the CVRP path.
#[derive(Debug, Clone)]
pub struct CvrpClient {
    client: Client,
    endpoint: String,
}

impl CvrpClient {
    pub fn new(endpoint: &str, solve_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(solve_timeout)
            .build()
            .expect("failed to build CVRP client");
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Bounded health probe. Any transport or decode failure reads as
    /// unhealthy; the caller downgrades rather than erroring.
    pub async fn health(&self, probe_timeout: Duration) -> bool {
        let url = format!("{}/health", self.endpoint);
        let probe = async {
            let response = self.client.get(&url).send().await.ok()?;
            response.json::<HealthResponse>().await.ok()
        };
        match timeout(probe_timeout, probe).await {
            Ok(Some(health)) => health.healthy,
            Ok(None) => false,
            Err(_) => {
                warn!("CVRP health probe timed out");
                false
            }
        }
    }

    pub async fn solve(&self, request: &CvrpRequest) -> Result<Vec<CvrpRoute>, DispatchError> {
        let url = format!("{}/optimize", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|err| DispatchError::Cvrp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DispatchError::Cvrp(format!(
                "solver returned HTTP {}",
                response.status()
            )));
        }
        let solved: SolveResponse = response
            .json()
            .await
            .map_err(|err| DispatchError::Cvrp(format!("undecodable solver response: {err}")))?;
        Ok(solved.routes)
    }
}
