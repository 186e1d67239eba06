//! Fast-matrix routing engine client.
//!
//! Thin HTTP wrapper over the external routing engine's table service
//! (`/table/v1/driving/...`). The client only fetches and validates; the
//! matrix cache in [`crate::matrix`] owns caching and fallback policy.

pub mod client;
pub mod error;
pub mod parser;
pub mod response;

pub use client::TableClient;
pub use error::TableError;
