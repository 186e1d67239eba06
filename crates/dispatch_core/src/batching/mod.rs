//! Smart batching engine.
//!
//! Every cycle: collect batchable pending orders, cluster them by dropoff
//! proximity, and for each cluster create a batch, pick one driver, build a
//! multi-stop route, and persist everything atomically. A cluster that
//! cannot get a driver dissolves back into single-order dispatch. Cycles
//! are serialized against themselves.

pub mod cluster;

pub use cluster::cluster_orders;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BatchingConfig;
use crate::domain::{
    Batch, BatchId, BatchStatus, DriverState, Order, OrderId,
};
use crate::drivers::{CandidateQuery, DriverEngine, ScoredCandidate};
use crate::error::DispatchError;
use crate::events::{EventBus, FleetEvent};
use crate::monitoring::ErrorMonitor;
use crate::optimizer::{Delivery, OptimizeRequest, RouteOptimizer};
use crate::spatial::centroid;
use crate::store::FleetStore;

#[derive(Debug, Clone, Default)]
pub struct BatchingCycleReport {
    /// True when the cycle was skipped because the previous one was still
    /// executing.
    pub skipped: bool,
    pub candidates: usize,
    pub clusters: usize,
    pub batches_created: usize,
    pub dissolved: usize,
    pub failed: usize,
}

pub struct BatchingEngine {
    store: Arc<dyn FleetStore>,
    drivers: Arc<DriverEngine>,
    optimizer: Arc<RouteOptimizer>,
    bus: EventBus,
    monitor: Arc<ErrorMonitor>,
    config: BatchingConfig,
    /// Overlap gate: a new cycle never starts while one is executing.
    gate: Mutex<()>,
}

impl BatchingEngine {
    pub fn new(
        store: Arc<dyn FleetStore>,
        drivers: Arc<DriverEngine>,
        optimizer: Arc<RouteOptimizer>,
        bus: EventBus,
        monitor: Arc<ErrorMonitor>,
        config: BatchingConfig,
    ) -> Self {
        Self {
            store,
            drivers,
            optimizer,
            bus,
            monitor,
            config,
            gate: Mutex::new(()),
        }
    }

    /// One batching pass. Per-cluster failures are logged and skipped; the
    /// cycle always completes.
    pub async fn run_cycle(&self) -> Result<BatchingCycleReport, DispatchError> {
        let Ok(_guard) = self.gate.try_lock() else {
            debug!("batching cycle still running, skipping this tick");
            return Ok(BatchingCycleReport {
                skipped: true,
                ..Default::default()
            });
        };

        let candidates = self
            .store
            .batching_candidates(
                self.config.batchable_class,
                self.config.max_candidate_age_minutes,
                self.config.min_deadline_slack_minutes,
                self.config.max_candidates_per_cycle,
            )
            .await?;

        let clusters = cluster_orders(&candidates, &self.config);
        let mut report = BatchingCycleReport {
            candidates: candidates.len(),
            clusters: clusters.len(),
            ..Default::default()
        };

        for indices in &clusters {
            let members: Vec<Order> = indices.iter().map(|&i| candidates[i].clone()).collect();
            match self.build_batch(members).await {
                Ok(_) => report.batches_created += 1,
                Err(DispatchError::NoAvailableDrivers { .. }) => report.dissolved += 1,
                Err(err) => {
                    warn!(%err, "batch construction failed");
                    self.monitor.track_dispatch("batching", &err);
                    report.failed += 1;
                }
            }
        }

        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                clusters = report.clusters,
                batches_created = report.batches_created,
                dissolved = report.dissolved,
                "batching cycle finished"
            );
        }
        Ok(report)
    }

    /// Create, staff, route, and persist one batch. Any failure after the
    /// batch row exists unlinks the members again.
    async fn build_batch(&self, members: Vec<Order>) -> Result<BatchId, DispatchError> {
        let now = Utc::now();
        let batch = Batch {
            id: uuid::Uuid::new_v4(),
            number: batch_number(now),
            order_ids: members.iter().map(|order| order.id).collect(),
            service_class: members[0].service_class,
            driver_id: None,
            status: BatchStatus::Pending,
            created_at: now,
        };
        self.store.create_batch(&batch).await?;

        match self.staff_and_route(&batch, &members).await {
            Ok(batch_id) => Ok(batch_id),
            Err(err) => {
                // Roll back: members return to the single-order pool.
                if let Err(rollback_err) = self.store.dissolve_batch(batch.id).await {
                    warn!(batch_id = %batch.id, %rollback_err, "batch rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn staff_and_route(
        &self,
        batch: &Batch,
        members: &[Order],
    ) -> Result<BatchId, DispatchError> {
        let total_weight: f64 = members.iter().map(|order| order.weight_kg).sum();
        let pickups: Vec<_> = members.iter().map(|order| order.pickup).collect();
        let anchor = centroid(&pickups)
            .ok_or_else(|| DispatchError::Validation("batch without members".to_string()))?;

        let candidates = self
            .drivers
            .available_drivers(
                anchor,
                CandidateQuery {
                    service_class: Some(batch.service_class),
                    ..CandidateQuery::default()
                },
            )
            .await?;
        let chosen: &ScoredCandidate = candidates
            .iter()
            .find(|candidate| candidate.driver.residual_capacity_kg() >= total_weight)
            .ok_or(DispatchError::NoAvailableDrivers {
                order_id: members[0].id,
            })?;

        let deliveries: Vec<Delivery> = members
            .iter()
            .map(|order| Delivery {
                order_id: order.id,
                pickup: order.pickup,
                dropoff: order.dropoff,
                demand_kg: order.weight_kg,
                deadline: order.sla_deadline,
            })
            .collect();

        let mut route = self
            .optimizer
            .optimize(&OptimizeRequest {
                driver_id: chosen.driver.id,
                start: chosen.driver.position,
                capacity_kg: chosen.driver.capacity_kg,
                deliveries,
                return_to: None,
                sla_minutes: batch.service_class.default_sla_minutes(),
                use_cvrp: None,
            })
            .await;
        route.batch_id = Some(batch.id);

        let member_etas: Vec<(OrderId, chrono::DateTime<Utc>)> = route
            .stops
            .iter()
            .filter(|stop| stop.kind == crate::domain::StopKind::Delivery)
            .filter_map(|stop| stop.order_id.map(|order_id| (order_id, stop.eta)))
            .collect();

        let from_state = chosen.driver.state;
        self.store
            .assign_batch_tx(batch.id, chosen.driver.id, &route, &member_etas)
            .await?;

        self.bus.publish(FleetEvent::StateChanged {
            driver_id: chosen.driver.id,
            from: from_state,
            to: DriverState::Busy,
            at: Utc::now(),
        });
        self.bus.publish(FleetEvent::BatchCreated {
            batch_id: batch.id,
            driver_id: chosen.driver.id,
            order_count: members.len(),
            at: Utc::now(),
        });
        info!(
            batch_id = %batch.id,
            driver_id = %chosen.driver.id,
            orders = members.len(),
            stops = route.stops.len(),
            engine = route.engine.as_str(),
            "batch created"
        );
        Ok(batch.id)
    }
}

/// Human-readable batch number, unique enough for operators.
fn batch_number(now: chrono::DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("BT-{}-{}", now.format("%Y%m%d"), &suffix[..6].to_uppercase())
}
