//! Errors from the table service client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table request failed: {0}")]
    Http(reqwest::Error),

    #[error("table response was not valid JSON: {0}")]
    Json(reqwest::Error),

    #[error("table service error: {0}")]
    Api(String),

    #[error("table response missing matrix data")]
    MissingMatrix,
}

impl From<reqwest::Error> for TableError {
    fn from(err: reqwest::Error) -> Self {
        TableError::Http(err)
    }
}
