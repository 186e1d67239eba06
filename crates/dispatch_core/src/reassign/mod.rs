//! SLA reassignment engine.
//!
//! Periodically scans in-flight orders, classifies their SLA risk from the
//! current delivery estimate, and atomically hands at-risk orders over to a
//! better driver. Reassignment per order is serialized and bounded:
//! after `max_attempts` the order escalates to a human operator.

pub mod risk;
pub mod score;

pub use risk::{assess, RiskAssessment, SlaRisk};
pub use score::{is_eligible, reassignment_score};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::ReassignConfig;
use crate::domain::{
    Driver, DriverState, Order, OrderId, OrderStatus, ReassignmentRecord,
};
use crate::drivers::DriverEngine;
use crate::error::DispatchError;
use crate::eta::{driver_to_pickup_eta, EtaRequest, TrafficCondition, WeatherCondition};
use crate::events::{EventBus, FleetEvent};
use crate::monitoring::ErrorMonitor;
use crate::spatial::haversine_km;
use crate::store::{DriverQuery, FleetStore};

/// In-memory history bound; the authoritative rows live in the store.
const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct ReassignOutcome {
    pub order_id: OrderId,
    pub from_driver: Option<crate::domain::DriverId>,
    pub to_driver: crate::domain::DriverId,
    pub attempt: u32,
    pub score: f64,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReassignCycleReport {
    pub scanned: usize,
    pub at_risk: usize,
    pub reassigned: usize,
    pub escalated: usize,
    pub failed: usize,
}

/// Removes the per-order in-flight marker when an attempt finishes.
struct InFlightGuard<'a> {
    map: &'a DashMap<OrderId, ()>,
    order_id: OrderId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.order_id);
    }
}

pub struct ReassignEngine {
    store: Arc<dyn FleetStore>,
    drivers: Arc<DriverEngine>,
    bus: EventBus,
    monitor: Arc<ErrorMonitor>,
    config: ReassignConfig,
    /// Consecutive handover failures per order; reset on success.
    failure_counts: DashMap<OrderId, u32>,
    /// At most one reassignment attempt in flight per order.
    in_flight: DashMap<OrderId, ()>,
    history: Mutex<VecDeque<ReassignmentRecord>>,
}

impl ReassignEngine {
    pub fn new(
        store: Arc<dyn FleetStore>,
        drivers: Arc<DriverEngine>,
        bus: EventBus,
        monitor: Arc<ErrorMonitor>,
        config: ReassignConfig,
    ) -> Self {
        Self {
            store,
            drivers,
            bus,
            monitor,
            config,
            failure_counts: DashMap::new(),
            in_flight: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Recent successful handovers, newest last.
    pub fn recent_reassignments(&self) -> Vec<ReassignmentRecord> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// One scan over the in-flight orders. Per-order failures are logged
    /// and skipped; the scan always completes.
    pub async fn run_cycle(&self) -> Result<ReassignCycleReport, DispatchError> {
        let now = Utc::now();
        let orders = self.store.in_flight_orders().await?;
        let mut report = ReassignCycleReport {
            scanned: orders.len(),
            ..Default::default()
        };

        for order in orders {
            let Some(estimate) = self.estimate_delivery(&order, now).await? else {
                continue;
            };
            let assessment = assess(&order, estimate, now);
            match assessment.risk {
                SlaRisk::Breached => {
                    report.escalated += 1;
                    self.bus.publish(FleetEvent::SlaBreach {
                        order_id: order.id,
                        deadline: order.sla_deadline,
                        at: now,
                    });
                    self.escalate(order.id, "sla deadline breached");
                }
                _ if assessment.needs_reassignment() => {
                    report.at_risk += 1;
                    let reason = match assessment.risk {
                        SlaRisk::Critical => "sla_critical",
                        _ => "sla_warning",
                    };
                    match self.attempt_reassignment(&order, reason).await {
                        Ok(_) => report.reassigned += 1,
                        Err(DispatchError::MaxReassignAttempts { .. }) => {
                            report.escalated += 1;
                        }
                        Err(DispatchError::NoAvailableDrivers { .. }) => {
                            debug!(order_id = %order.id, "no eligible reassignment target");
                        }
                        Err(err) => {
                            warn!(order_id = %order.id, %err, "reassignment failed");
                            self.monitor.track_dispatch("reassignment", &err);
                            report.failed += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        if report.at_risk > 0 || report.escalated > 0 {
            info!(
                scanned = report.scanned,
                at_risk = report.at_risk,
                reassigned = report.reassigned,
                escalated = report.escalated,
                "reassignment scan finished"
            );
        }
        Ok(report)
    }

    /// Estimate when the order will be delivered by its current driver:
    /// remaining leg distance (driver → pickup → dropoff before pickup,
    /// driver → dropoff after), run through the dynamic ETA model.
    async fn estimate_delivery(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, DispatchError> {
        let Some(driver_id) = order.driver_id else {
            return Ok(None);
        };
        let Some(driver) = self.store.driver(driver_id).await? else {
            return Ok(None);
        };
        let distance_km = match order.status {
            OrderStatus::PickedUp => haversine_km(driver.position, order.dropoff),
            _ => {
                haversine_km(driver.position, order.pickup)
                    + haversine_km(order.pickup, order.dropoff)
            }
        };
        let estimate = driver_to_pickup_eta(
            self.drivers.eta_policy(),
            EtaRequest {
                distance_km,
                vehicle_type: driver.vehicle_type,
                traffic: TrafficCondition::Normal,
                weather: WeatherCondition::Normal,
                driver_state: driver.state,
            },
            now,
        );
        Ok(Some(estimate.arrival_time))
    }

    fn escalate(&self, order_id: OrderId, reason: &str) {
        self.bus.publish(FleetEvent::EscalationRequired {
            order_id,
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    /// Attempt one handover for an at-risk order.
    pub async fn attempt_reassignment(
        &self,
        order: &Order,
        reason: &str,
    ) -> Result<ReassignOutcome, DispatchError> {
        let _guard = self.acquire(order.id)?;

        if order.reassignment_count >= self.config.max_attempts {
            self.escalate(order.id, "reassignment attempts exhausted");
            return Err(DispatchError::MaxReassignAttempts {
                order_id: order.id,
                should_escalate: true,
            });
        }

        let (candidate, distance_km, candidate_score) = self.select_candidate(order).await?;

        let record = ReassignmentRecord {
            order_id: order.id,
            from_driver: order.driver_id,
            to_driver: candidate.id,
            reason: reason.to_string(),
            distance_km,
            driver_score: candidate_score,
            at: Utc::now(),
        };

        match self.store.reassign_order_tx(&record).await {
            Ok(()) => {
                self.failure_counts.remove(&order.id);
                {
                    let mut history = self.history.lock().unwrap();
                    if history.len() == HISTORY_CAPACITY {
                        history.pop_front();
                    }
                    history.push_back(record.clone());
                }
                let attempt = order.reassignment_count + 1;
                if let Some(old_driver) = order.driver_id {
                    self.bus.publish(FleetEvent::StateChanged {
                        driver_id: old_driver,
                        from: DriverState::Busy,
                        to: DriverState::Available,
                        at: record.at,
                    });
                }
                self.bus.publish(FleetEvent::StateChanged {
                    driver_id: candidate.id,
                    from: candidate.state,
                    to: DriverState::Busy,
                    at: record.at,
                });
                self.bus.publish(FleetEvent::ReassignmentSucceeded {
                    order_id: order.id,
                    from_driver: order.driver_id,
                    to_driver: candidate.id,
                    attempt,
                    at: record.at,
                });
                info!(
                    order_id = %order.id,
                    to_driver = %candidate.id,
                    attempt,
                    "order reassigned"
                );
                Ok(ReassignOutcome {
                    order_id: order.id,
                    from_driver: order.driver_id,
                    to_driver: candidate.id,
                    attempt,
                    score: candidate_score,
                    distance_km,
                })
            }
            Err(store_err) => {
                let failures = {
                    let mut entry = self.failure_counts.entry(order.id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                self.bus.publish(FleetEvent::ReassignmentFailed {
                    order_id: order.id,
                    reason: store_err.to_string(),
                    at: Utc::now(),
                });
                if failures >= self.config.max_attempts {
                    self.escalate(order.id, "reassignment handover kept failing");
                    return Err(DispatchError::MaxReassignAttempts {
                        order_id: order.id,
                        should_escalate: true,
                    });
                }
                Err(store_err.into())
            }
        }
    }

    fn acquire(&self, order_id: OrderId) -> Result<InFlightGuard<'_>, DispatchError> {
        use dashmap::mapref::entry::Entry;
        match self.in_flight.entry(order_id) {
            Entry::Occupied(_) => Err(DispatchError::Validation(format!(
                "reassignment already in flight for order {order_id}"
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(InFlightGuard {
                    map: &self.in_flight,
                    order_id,
                })
            }
        }
    }

    /// Best eligible driver by the weighted score; the incumbent driver is
    /// suppressed. Ties break on smaller distance.
    async fn select_candidate(
        &self,
        order: &Order,
    ) -> Result<(Driver, f64, f64), DispatchError> {
        let candidates = self
            .store
            .drivers_near(
                order.pickup,
                &DriverQuery {
                    radius_km: self.config.max_distance_km,
                    service_class: Some(order.service_class),
                    exclude_vehicle_types: Vec::new(),
                },
            )
            .await?;

        let mut best: Option<(Driver, f64, f64)> = None;
        for driver in candidates {
            if Some(driver.id) == order.driver_id {
                continue;
            }
            let distance_km = haversine_km(driver.position, order.pickup);
            if !is_eligible(&driver, order, distance_km, &self.config) {
                continue;
            }
            let score = reassignment_score(&driver, distance_km, &self.config);
            let better = match &best {
                None => true,
                Some((_, best_distance, best_score)) => {
                    score > *best_score
                        || (score == *best_score && distance_km < *best_distance)
                }
            };
            if better {
                best = Some((driver, distance_km, score));
            }
        }

        best.ok_or(DispatchError::NoAvailableDrivers {
            order_id: order.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::GeoPoint;
    use crate::test_helpers::{
        collect_events, make_driver, make_order, reassign_fixture,
    };
    use chrono::Duration;

    fn at_risk_order(driver_id: crate::domain::DriverId) -> Order {
        let mut order = make_order();
        order.status = OrderStatus::Assigned;
        order.driver_id = Some(driver_id);
        order.reassignment_count = 1;
        order.sla_deadline = Utc::now() + Duration::minutes(12);
        order
    }

    fn eligible_driver() -> Driver {
        let mut driver = make_driver();
        driver.on_time_rate = Some(0.95);
        driver.position = GeoPoint::new(52.525, 13.41);
        driver
    }

    #[tokio::test]
    async fn reassignment_hands_the_order_over_atomically() {
        let (store, bus, engine) = reassign_fixture();

        let mut old_driver = make_driver();
        old_driver.state = DriverState::Busy;
        // Far away and slow: the order will miss its deadline.
        old_driver.position = GeoPoint::new(52.70, 13.70);
        let order = at_risk_order(old_driver.id);
        old_driver.active_order = Some(order.id);
        let new_driver = eligible_driver();

        store.seed_driver(old_driver.clone()).await;
        store.seed_driver(new_driver.clone()).await;
        store.seed_order(order.clone()).await;
        let mut rx = bus.subscribe();

        let outcome = engine
            .attempt_reassignment(&order, "sla_critical")
            .await
            .expect("reassignment");
        assert_eq!(outcome.to_driver, new_driver.id);
        assert_eq!(outcome.attempt, 2);

        let stored_order = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored_order.driver_id, Some(new_driver.id));
        assert_eq!(stored_order.reassignment_count, 2);
        assert_eq!(stored_order.status, OrderStatus::Assigned);

        let freed = store.driver(old_driver.id).await.unwrap().unwrap();
        assert_eq!(freed.state, DriverState::Available);
        assert_eq!(freed.active_order, None);
        let busy = store.driver(new_driver.id).await.unwrap().unwrap();
        assert_eq!(busy.state, DriverState::Busy);
        assert_eq!(busy.active_order, Some(order.id));

        let history = store.reassignment_history(order.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to_driver, new_driver.id);

        let kinds: Vec<_> = collect_events(&mut rx).iter().map(|e| e.kind()).collect();
        assert!(kinds.contains(&"reassignment-succeeded"));
    }

    #[tokio::test]
    async fn exhausted_attempts_escalate() {
        let (store, bus, engine) = reassign_fixture();
        let mut order = make_order();
        order.status = OrderStatus::Assigned;
        order.reassignment_count = 3;
        store.seed_order(order.clone()).await;
        store.seed_driver(eligible_driver()).await;
        let mut rx = bus.subscribe();

        let err = engine
            .attempt_reassignment(&order, "sla_critical")
            .await
            .expect_err("must escalate");
        assert_eq!(err.code(), "MAX_REASSIGN_ATTEMPTS");
        assert!(err.should_escalate());

        let kinds: Vec<_> = collect_events(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["escalation-required"]);
    }

    #[tokio::test]
    async fn incumbent_driver_is_suppressed() {
        let (store, _bus, engine) = reassign_fixture();
        let incumbent = eligible_driver();
        let mut order = at_risk_order(incumbent.id);
        order.driver_id = Some(incumbent.id);
        store.seed_driver(incumbent).await;
        store.seed_order(order.clone()).await;

        let err = engine
            .attempt_reassignment(&order, "sla_critical")
            .await
            .expect_err("nobody else to take it");
        assert_eq!(err.code(), "NO_AVAILABLE_DRIVERS");
    }

    #[tokio::test]
    async fn ineligible_candidates_are_filtered() {
        let (store, _bus, engine) = reassign_fixture();
        let order = at_risk_order(uuid::Uuid::new_v4());

        let mut slow = eligible_driver();
        slow.on_time_rate = Some(0.7);
        let mut exhausted = eligible_driver();
        exhausted.hours_worked_today = 11.0;
        store.seed_driver(slow).await;
        store.seed_driver(exhausted).await;
        store.seed_order(order.clone()).await;

        let err = engine
            .attempt_reassignment(&order, "sla_warning")
            .await
            .expect_err("no eligible candidates");
        assert_eq!(err.code(), "NO_AVAILABLE_DRIVERS");
    }

    #[tokio::test]
    async fn breached_orders_emit_sla_breach_and_escalation() {
        let (store, bus, engine) = reassign_fixture();
        let mut driver = make_driver();
        driver.state = DriverState::Busy;
        let mut order = make_order();
        order.status = OrderStatus::Assigned;
        order.driver_id = Some(driver.id);
        order.sla_deadline = Utc::now() - Duration::minutes(5);
        driver.active_order = Some(order.id);
        store.seed_driver(driver).await;
        store.seed_order(order.clone()).await;
        let mut rx = bus.subscribe();

        let report = engine.run_cycle().await.expect("cycle");
        assert_eq!(report.escalated, 1);

        let kinds: Vec<_> = collect_events(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["sla-breach", "escalation-required"]);
    }

    #[tokio::test]
    async fn scan_reassigns_an_at_risk_order_end_to_end() {
        let (store, _bus, engine) = reassign_fixture();
        let mut old_driver = make_driver();
        old_driver.state = DriverState::Busy;
        old_driver.position = GeoPoint::new(52.80, 13.90);
        let mut order = make_order();
        order.status = OrderStatus::Assigned;
        order.driver_id = Some(old_driver.id);
        order.sla_deadline = Utc::now() + Duration::minutes(12);
        old_driver.active_order = Some(order.id);
        let rescue = eligible_driver();
        store.seed_driver(old_driver).await;
        store.seed_driver(rescue.clone()).await;
        store.seed_order(order.clone()).await;

        let report = engine.run_cycle().await.expect("cycle");
        assert_eq!(report.reassigned, 1);
        let stored = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(rescue.id));
    }
}
