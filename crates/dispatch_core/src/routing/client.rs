//! HTTP client for the table service.

use std::time::Duration;

use reqwest::{Client, Url};

use super::error::TableError;
use super::parser::parse_table_response;
use super::response::TableResponse;
use crate::matrix::TravelMatrix;
use crate::spatial::GeoPoint;

/// Thin HTTP client for the routing engine's pairwise matrix endpoint.
#[derive(Debug, Clone)]
pub struct TableClient {
    client: Client,
    endpoint: String,
}

impl TableClient {
    /// Create a client for the given endpoint (e.g. `http://localhost:5000`).
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build table client");
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the full distance/duration matrix over `coords`.
    pub async fn table(&self, coords: &[GeoPoint]) -> Result<TravelMatrix, TableError> {
        if coords.is_empty() {
            return Ok(TravelMatrix::zero(0));
        }

        let coord_segment = coords
            .iter()
            .map(|point| format!("{},{}", point.lng, point.lat))
            .collect::<Vec<_>>()
            .join(";");

        let base = format!("{}/table/v1/driving/{}", self.endpoint, coord_segment);
        let mut url = Url::parse(&base)
            .map_err(|err| TableError::Api(format!("failed to build table URL: {}", err)))?;
        url.query_pairs_mut()
            .append_pair("annotations", "duration,distance");

        let response = self.client.get(url).send().await.map_err(TableError::Http)?;
        let parsed: TableResponse = response.json().await.map_err(TableError::Json)?;
        parse_table_response(parsed, coords.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_is_an_http_error() {
        let client = TableClient::new("http://127.0.0.1:1", Duration::from_millis(250));
        let coords = [GeoPoint::new(52.52, 13.405), GeoPoint::new(52.50, 13.37)];
        match client.table(&coords).await {
            Err(TableError::Http(_)) => {}
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_coordinate_list_short_circuits() {
        let client = TableClient::new("http://127.0.0.1:1", Duration::from_millis(250));
        let matrix = client.table(&[]).await.expect("empty matrix");
        assert!(matrix.is_empty());
    }
}
