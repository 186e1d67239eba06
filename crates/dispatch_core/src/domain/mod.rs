//! Domain model: drivers, orders, batches, routes, and their state enums.
//!
//! These structs mirror the rows of the relational store (see
//! [`crate::store`]); the engines mutate them only through store operations
//! so that the store remains the single source of truth.

pub mod batch;
pub mod driver;
pub mod order;
pub mod route;

pub use batch::{Batch, BatchStatus};
pub use driver::{Driver, DriverState, VehicleType};
pub use order::{Order, OrderStatus, ServiceClass};
pub use route::{Route, RouteEngine, RouteStop, StopKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DriverId = Uuid;
pub type OrderId = Uuid;
pub type BatchId = Uuid;

/// Audit row written by every successful reassignment handover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignmentRecord {
    pub order_id: OrderId,
    pub from_driver: Option<DriverId>,
    pub to_driver: DriverId,
    pub reason: String,
    pub distance_km: f64,
    pub driver_score: f64,
    pub at: DateTime<Utc>,
}
