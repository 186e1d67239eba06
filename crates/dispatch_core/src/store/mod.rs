//! Relational-store contract.
//!
//! The core never persists state itself; every engine talks to an
//! implementation of [`FleetStore`]. The store is the single source of truth
//! for orders and drivers, and all mutations that must be consistent
//! (assignment, reassignment handover, batch creation) are single
//! transactions behind one trait method.
//!
//! Production uses [`postgres::PgFleetStore`]; tests use the in-memory store
//! from `test_helpers`.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Batch, BatchId, Driver, DriverId, Order, OrderId, OrderStatus, ReassignmentRecord, Route,
    ServiceClass, VehicleType,
};
use crate::error::StoreError;
use crate::spatial::GeoPoint;

/// Filter for candidate-driver queries.
#[derive(Debug, Clone, Default)]
pub struct DriverQuery {
    pub radius_km: f64,
    pub service_class: Option<ServiceClass>,
    pub exclude_vehicle_types: Vec<VehicleType>,
}

#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Cheap liveness probe used by the supervisor during engine init.
    async fn ping(&self) -> Result<(), StoreError>;

    // ---------------------------------------------------------------------
    // Orders
    // ---------------------------------------------------------------------

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// PENDING orders with no driver and no batch, oldest first.
    async fn pending_unassigned_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError>;

    /// Batching candidates: PENDING, unassigned, unbatched orders of the
    /// given class, no older than `max_age_minutes`, with at least
    /// `min_deadline_slack_minutes` left before their deadline. Oldest
    /// first, capped at `limit`.
    async fn batching_candidates(
        &self,
        class: ServiceClass,
        max_age_minutes: i64,
        min_deadline_slack_minutes: i64,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError>;

    /// ASSIGNED and PICKED_UP orders, the reassignment scan set.
    async fn in_flight_orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<(), StoreError>;

    async fn set_order_delivery_eta(
        &self,
        id: OrderId,
        eta: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ---------------------------------------------------------------------
    // Drivers
    // ---------------------------------------------------------------------

    async fn insert_driver(&self, driver: &Driver) -> Result<(), StoreError>;

    async fn driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError>;

    async fn all_drivers(&self) -> Result<Vec<Driver>, StoreError>;

    /// Whole-row update keyed on `driver.id`.
    async fn update_driver(&self, driver: &Driver) -> Result<(), StoreError>;

    /// Active AVAILABLE / RETURNING drivers within `query.radius_km` of
    /// `center`, optionally filtered by service class and vehicle type.
    async fn drivers_near(
        &self,
        center: GeoPoint,
        query: &DriverQuery,
    ) -> Result<Vec<Driver>, StoreError>;

    /// Daily boundary reset: zero the daily counters on every driver.
    /// Returns the number of rows touched.
    async fn reset_daily_metrics(&self) -> Result<u64, StoreError>;

    // ---------------------------------------------------------------------
    // Transactional mutations
    // ---------------------------------------------------------------------

    /// Atomically advance an order to ASSIGNED and its driver to BUSY.
    /// Fails with [`StoreError::Conflict`] when the order is no longer
    /// PENDING or the driver is no longer assignable; nothing is written in
    /// that case.
    async fn assign_order_tx(
        &self,
        order_id: OrderId,
        driver_id: DriverId,
    ) -> Result<(), StoreError>;

    /// Atomic reassignment handover: move the order to the new driver,
    /// bump `reassignment_count`, free the old driver, mark the new driver
    /// BUSY, and insert the audit row. All-or-nothing.
    async fn reassign_order_tx(&self, record: &ReassignmentRecord) -> Result<(), StoreError>;

    /// Insert a PENDING batch row and link its member orders to it.
    async fn create_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Atomically assign a batch to a driver: batch → ASSIGNED, member
    /// orders → ASSIGNED with per-order delivery ETAs, driver → BUSY, and
    /// the route plus ordered stop table persisted.
    async fn assign_batch_tx(
        &self,
        batch_id: BatchId,
        driver_id: DriverId,
        route: &Route,
        member_etas: &[(OrderId, DateTime<Utc>)],
    ) -> Result<(), StoreError>;

    /// Unlink member orders (`batch_id = NULL`) and cancel the batch row.
    async fn dissolve_batch(&self, batch_id: BatchId) -> Result<(), StoreError>;

    async fn update_batch_status(
        &self,
        batch_id: BatchId,
        status: crate::domain::BatchStatus,
    ) -> Result<(), StoreError>;

    // ---------------------------------------------------------------------
    // Audit reads
    // ---------------------------------------------------------------------

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError>;

    async fn route_for_batch(&self, batch_id: BatchId) -> Result<Option<Route>, StoreError>;

    async fn reassignment_history(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReassignmentRecord>, StoreError>;
}
