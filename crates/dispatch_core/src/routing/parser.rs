//! Validation of table responses into [`TravelMatrix`] values.

use super::error::TableError;
use super::response::TableResponse;
use crate::matrix::TravelMatrix;

/// Check the response code and matrix shape; `n` is the number of
/// coordinates in the request.
pub fn parse_table_response(response: TableResponse, n: usize) -> Result<TravelMatrix, TableError> {
    if response.code != "Ok" {
        let detail = response.message.unwrap_or_else(|| response.code.clone());
        return Err(TableError::Api(detail));
    }

    let (Some(distances), Some(durations)) = (response.distances, response.durations) else {
        return Err(TableError::MissingMatrix);
    };

    let square = |m: &Vec<Vec<f64>>| m.len() == n && m.iter().all(|row| row.len() == n);
    if !square(&distances) || !square(&durations) {
        return Err(TableError::MissingMatrix);
    }

    Ok(TravelMatrix {
        distances,
        durations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(n: usize) -> TableResponse {
        TableResponse {
            code: "Ok".to_string(),
            message: None,
            distances: Some(vec![vec![1.0; n]; n]),
            durations: Some(vec![vec![2.0; n]; n]),
        }
    }

    #[test]
    fn ok_response_parses() {
        let matrix = parse_table_response(ok_response(2), 2).expect("matrix");
        assert_eq!(matrix.distances.len(), 2);
        assert_eq!(matrix.durations[1][0], 2.0);
    }

    #[test]
    fn non_ok_code_is_api_error() {
        let mut response = ok_response(2);
        response.code = "Error".to_string();
        match parse_table_response(response, 2) {
            Err(TableError::Api(_)) => {}
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn missing_matrix_is_rejected() {
        let mut response = ok_response(2);
        response.durations = None;
        assert!(matches!(
            parse_table_response(response, 2),
            Err(TableError::MissingMatrix)
        ));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let response = ok_response(3);
        assert!(matches!(
            parse_table_response(response, 2),
            Err(TableError::MissingMatrix)
        ));
    }
}
