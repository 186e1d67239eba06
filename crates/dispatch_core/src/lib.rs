//! # Dispatch Core
//!
//! Autonomous dispatch and routing core for a last-mile delivery fleet.
//!
//! ## Overview
//!
//! This crate provides the decision loop of the fleet platform:
//!
//! - **Driver State Engine**: per-driver lifecycle, availability scoring
//! - **Dispatch Engine**: single-order driver selection and assignment
//! - **Smart Batching**: clustering pending orders into multi-stop routes
//! - **SLA Reassignment**: at-risk detection and atomic handover
//! - **Hybrid Route Optimizer**: CVRP solver vs. fast travel-matrix routing
//! - **Matrix Cache**: content-addressed travel matrices with fallback
//! - **Agent Trigger**: rate-limited cycle kicks from external agents
//!
//! ## Key Concepts
//!
//! - **Store as truth**: all order/driver state lives behind the
//!   [`store::FleetStore`] contract; consistent mutations are single
//!   transactions
//! - **Events**: every engine publishes [`events::FleetEvent`]s on a
//!   broadcast bus; sinks subscribe, engines never call them
//! - **Degradation**: external routing and solver failures degrade
//!   (haversine matrix, fast-matrix route, naive route) instead of failing
//!   the decision loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::store::postgres::PgFleetStore;
//! use dispatch_core::supervisor::{CoreEndpoints, Supervisor};
//!
//! # async fn run() -> Result<(), dispatch_core::error::DispatchError> {
//! let store = Arc::new(PgFleetStore::connect("postgres://localhost/fleet").await?);
//! let supervisor = Supervisor::assemble(
//!     store,
//!     DispatchConfig::from_env(),
//!     CoreEndpoints {
//!         routing_url: "http://localhost:5000".to_string(),
//!         cvrp_url: "http://localhost:7000".to_string(),
//!         redis_url: Some("redis://localhost:6379".to_string()),
//!     },
//! )
//! .await;
//! supervisor.start().await;
//! # Ok(())
//! # }
//! ```

pub mod batching;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod eta;
pub mod events;
pub mod matrix;
pub mod monitoring;
pub mod optimizer;
pub mod reassign;
pub mod routing;
pub mod spatial;
pub mod store;
pub mod supervisor;
pub mod trigger;

#[cfg(test)]
pub mod test_helpers;
