//! Dispatch engine: single-order driver selection and assignment.
//!
//! For one PENDING order: pull scored candidates from the driver engine,
//! enrich with dynamic ETA and deadline feasibility, pick the best feasible
//! driver, and advance order and driver atomically in one store
//! transaction. Zero candidates surfaces `NO_AVAILABLE_DRIVERS`; queueing
//! retries is the autonomous loop's job, not this engine's.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{Driver, Order, OrderId, OrderStatus};
use crate::drivers::{CandidateQuery, DriverEngine};
use crate::error::DispatchError;
use crate::eta::TimeWindow;
use crate::events::{EventBus, FleetEvent};
use crate::monitoring::ErrorMonitor;
use crate::store::FleetStore;

/// How many pending orders one dispatch cycle will look at.
const CYCLE_ORDER_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct AssignmentOutcome {
    pub order_id: OrderId,
    pub driver: Driver,
    pub score: f64,
    pub eta_minutes: f64,
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Default)]
pub struct DispatchCycleReport {
    pub examined: usize,
    pub assigned: usize,
    pub without_drivers: usize,
    pub failed: usize,
}

pub struct DispatchEngine {
    store: Arc<dyn FleetStore>,
    drivers: Arc<DriverEngine>,
    bus: EventBus,
    monitor: Arc<ErrorMonitor>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn FleetStore>,
        drivers: Arc<DriverEngine>,
        bus: EventBus,
        monitor: Arc<ErrorMonitor>,
    ) -> Self {
        Self {
            store,
            drivers,
            bus,
            monitor,
        }
    }

    /// Assign the best feasible driver to one order.
    pub async fn assign(&self, order_id: OrderId) -> Result<AssignmentOutcome, DispatchError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| DispatchError::Validation(format!("unknown order {order_id}")))?;
        if order.status != OrderStatus::Pending {
            return Err(DispatchError::Validation(format!(
                "order {order_id} is {:?}, expected PENDING",
                order.status
            )));
        }

        let best = self.select_driver(&order).await?;

        self.drivers.assign_order(best.driver.id, order_id).await?;
        self.bus.publish(FleetEvent::OrderAssigned {
            order_id,
            driver_id: best.driver.id,
            score: best.score,
            eta_minutes: best.eta_minutes,
            at: Utc::now(),
        });
        info!(
            %order_id,
            driver_id = %best.driver.id,
            score = best.score,
            eta_minutes = best.eta_minutes,
            "order assigned"
        );
        Ok(best)
    }

    /// Score candidates against the order's deadline window and keep the
    /// best feasible one. Deadline-infeasible drivers are dropped outright;
    /// the −50 window penalty already buried their score, but a driver that
    /// cannot arrive in time must not win by default on an empty field.
    async fn select_driver(&self, order: &Order) -> Result<AssignmentOutcome, DispatchError> {
        let window = TimeWindow {
            earliest: order.created_at,
            latest: order.sla_deadline,
        };
        let candidates = self
            .drivers
            .available_drivers(
                order.pickup,
                CandidateQuery {
                    service_class: Some(order.service_class),
                    time_window: Some(window),
                    ..CandidateQuery::default()
                },
            )
            .await?;

        let best = candidates
            .into_iter()
            .find(|candidate| candidate.is_feasible())
            .ok_or(DispatchError::NoAvailableDrivers {
                order_id: order.id,
            })?;

        Ok(AssignmentOutcome {
            order_id: order.id,
            score: best.score,
            eta_minutes: best.eta.total_minutes,
            driver: best.driver,
        })
    }

    /// One pass over the pending backlog. Per-order failures are logged and
    /// skipped; the cycle always completes.
    pub async fn run_cycle(&self) -> Result<DispatchCycleReport, DispatchError> {
        let pending = self.store.pending_unassigned_orders(CYCLE_ORDER_LIMIT).await?;
        let mut report = DispatchCycleReport {
            examined: pending.len(),
            ..Default::default()
        };

        for order in pending {
            match self.assign(order.id).await {
                Ok(_) => report.assigned += 1,
                Err(DispatchError::NoAvailableDrivers { .. }) => {
                    debug!(order_id = %order.id, "no available drivers this cycle");
                    report.without_drivers += 1;
                }
                Err(err) => {
                    warn!(order_id = %order.id, %err, "assignment failed");
                    self.monitor.track_dispatch("dispatch", &err);
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                assigned = report.assigned,
                without_drivers = report.without_drivers,
                failed = report.failed,
                "dispatch cycle finished"
            );
        }
        Ok(report)
    }
}
