//! Driver state engine.
//!
//! Authoritative lifecycle for every driver: shift and break rules,
//! assignment bookkeeping, the post-delivery state split, and the
//! availability scoring used by dispatch, reassignment, and batching.
//! Every mutation goes through the store and emits its lifecycle events
//! exactly once, in transition order.

pub mod score;
pub mod transitions;

pub use score::{availability_score, unavailability_reason, UnavailabilityReason};
pub use transitions::{next_state_after_delivery, validate_transition};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::DriverEngineConfig;
use crate::domain::{
    BatchStatus, Driver, DriverId, DriverState, OrderId, OrderStatus, ServiceClass, VehicleType,
};
use crate::error::DispatchError;
use crate::eta::{
    check_time_window, driver_to_pickup_eta, EtaEstimate, EtaPolicy, EtaRequest, TimeWindow,
    TimeWindowCheck, TimeWindowFeasibility, TrafficCondition, WeatherCondition,
};
use crate::events::{EventBus, FleetEvent};
use crate::spatial::{haversine_km, GeoPoint};
use crate::store::{DriverQuery, FleetStore};

/// Candidate query options for [`DriverEngine::available_drivers`].
#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    /// Search radius; engine default when `None`.
    pub radius_km: Option<f64>,
    /// Minimum rating; engine default when `None`.
    pub min_rating: Option<f64>,
    pub service_class: Option<ServiceClass>,
    pub exclude_vehicle_types: Vec<VehicleType>,
    /// When supplied, candidates get the time-window score adjustment and
    /// infeasible candidates are marked as such.
    pub time_window: Option<TimeWindow>,
    pub traffic: TrafficCondition,
    pub weather: WeatherCondition,
    pub limit: Option<usize>,
}

/// A candidate driver enriched with distance, dynamic ETA, and score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub driver: Driver,
    pub distance_km: f64,
    pub eta: EtaEstimate,
    pub window: Option<TimeWindowCheck>,
    pub score: f64,
}

impl ScoredCandidate {
    pub fn is_feasible(&self) -> bool {
        self.window
            .map_or(true, |w| w.feasibility != TimeWindowFeasibility::Infeasible)
    }
}

/// Aggregate fleet snapshot for operators and the supervisor health report.
#[derive(Debug, Clone, Default)]
pub struct FleetStatus {
    pub total: usize,
    pub by_state: HashMap<DriverState, usize>,
    /// Drivers that cannot take work, keyed by the reason label.
    pub unavailable_by_reason: HashMap<&'static str, usize>,
    pub average_rating: f64,
    /// BUSY share of the non-offline fleet.
    pub utilization: f64,
}

/// What happened to the driver after a completed delivery.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub driver: Driver,
    pub next_state: DriverState,
    pub break_required: bool,
}

pub struct DriverEngine {
    store: Arc<dyn FleetStore>,
    bus: EventBus,
    config: DriverEngineConfig,
    eta_policy: EtaPolicy,
}

impl DriverEngine {
    pub fn new(
        store: Arc<dyn FleetStore>,
        bus: EventBus,
        config: DriverEngineConfig,
        eta_policy: EtaPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            eta_policy,
        }
    }

    pub fn eta_policy(&self) -> &EtaPolicy {
        &self.eta_policy
    }

    async fn load(&self, driver_id: DriverId) -> Result<Driver, DispatchError> {
        self.store
            .driver(driver_id)
            .await?
            .ok_or_else(|| DispatchError::Validation(format!("unknown driver {driver_id}")))
    }

    fn emit_transition(&self, driver_id: DriverId, from: DriverState, to: DriverState) {
        self.bus.publish(FleetEvent::StateChanged {
            driver_id,
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Candidate drivers near a pickup, scored and sorted best-first.
    /// Ties are broken by smaller distance.
    pub async fn available_drivers(
        &self,
        pickup: GeoPoint,
        query: CandidateQuery,
    ) -> Result<Vec<ScoredCandidate>, DispatchError> {
        let radius_km = query.radius_km.unwrap_or(self.config.default_radius_km);
        let min_rating = query.min_rating.unwrap_or(self.config.min_rating);
        let now = Utc::now();

        let drivers = self
            .store
            .drivers_near(
                pickup,
                &DriverQuery {
                    radius_km,
                    service_class: query.service_class,
                    exclude_vehicle_types: query.exclude_vehicle_types.clone(),
                },
            )
            .await?;

        let mut candidates: Vec<ScoredCandidate> = drivers
            .into_iter()
            .filter(|driver| driver.rating >= min_rating)
            .filter(|driver| unavailability_reason(driver).is_none())
            .map(|driver| {
                let distance_km = haversine_km(driver.position, pickup);
                let eta = driver_to_pickup_eta(
                    &self.eta_policy,
                    EtaRequest {
                        distance_km,
                        vehicle_type: driver.vehicle_type,
                        traffic: query.traffic,
                        weather: query.weather,
                        driver_state: driver.state,
                    },
                    now,
                );
                let window = query.time_window.map(|window| {
                    check_time_window(&self.eta_policy, now, window, eta.total_minutes)
                });
                let score = availability_score(&driver, distance_km, window.as_ref());
                ScoredCandidate {
                    driver,
                    distance_km,
                    eta,
                    window,
                    score,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.distance_km
                        .partial_cmp(&b.distance_km)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        if let Some(limit) = query.limit {
            candidates.truncate(limit);
        }
        Ok(candidates)
    }

    pub async fn start_shift(&self, driver_id: DriverId) -> Result<Driver, DispatchError> {
        let mut driver = self.load(driver_id).await?;
        if driver.state != DriverState::Offline {
            return Err(DispatchError::IllegalTransition {
                from: driver.state,
                to: DriverState::Available,
                detail: "shift start while not offline".to_string(),
            });
        }
        validate_transition(&driver, DriverState::Available)?;
        let from = driver.state;
        driver.state = DriverState::Available;
        driver.consecutive_deliveries = 0;
        driver.shift_started_at = Some(Utc::now());
        self.store.update_driver(&driver).await?;
        self.emit_transition(driver_id, from, DriverState::Available);
        self.bus.publish(FleetEvent::ShiftStarted {
            driver_id,
            at: Utc::now(),
        });
        info!(%driver_id, "shift started");
        Ok(driver)
    }

    pub async fn end_shift(&self, driver_id: DriverId) -> Result<Driver, DispatchError> {
        let mut driver = self.load(driver_id).await?;
        validate_transition(&driver, DriverState::Offline)?;
        let from = driver.state;
        if let Some(started) = driver.shift_started_at {
            let hours = (Utc::now() - started).num_seconds() as f64 / 3600.0;
            driver.hours_worked_today += hours.max(0.0);
        }
        driver.state = DriverState::Offline;
        driver.shift_started_at = None;
        self.store.update_driver(&driver).await?;
        self.emit_transition(driver_id, from, DriverState::Offline);
        self.bus.publish(FleetEvent::ShiftEnded {
            driver_id,
            at: Utc::now(),
        });
        info!(%driver_id, "shift ended");
        Ok(driver)
    }

    pub async fn start_break(&self, driver_id: DriverId) -> Result<Driver, DispatchError> {
        let mut driver = self.load(driver_id).await?;
        if !matches!(
            driver.state,
            DriverState::Available | DriverState::Returning
        ) {
            return Err(DispatchError::IllegalTransition {
                from: driver.state,
                to: DriverState::OnBreak,
                detail: "break start while unavailable".to_string(),
            });
        }
        validate_transition(&driver, DriverState::OnBreak)?;
        let from = driver.state;
        driver.state = DriverState::OnBreak;
        self.store.update_driver(&driver).await?;
        self.emit_transition(driver_id, from, DriverState::OnBreak);
        self.bus.publish(FleetEvent::BreakStarted {
            driver_id,
            at: Utc::now(),
        });
        Ok(driver)
    }

    pub async fn end_break(&self, driver_id: DriverId) -> Result<Driver, DispatchError> {
        let mut driver = self.load(driver_id).await?;
        if driver.state != DriverState::OnBreak {
            return Err(DispatchError::IllegalTransition {
                from: driver.state,
                to: DriverState::Available,
                detail: "break end without an active break".to_string(),
            });
        }
        validate_transition(&driver, DriverState::Available)?;
        let from = driver.state;
        driver.state = DriverState::Available;
        driver.consecutive_deliveries = 0;
        self.store.update_driver(&driver).await?;
        self.emit_transition(driver_id, from, DriverState::Available);
        self.bus.publish(FleetEvent::BreakEnded {
            driver_id,
            at: Utc::now(),
        });
        Ok(driver)
    }

    /// Assign a single order: validates the transition, then performs the
    /// atomic order/driver handover in one store transaction. Emits the
    /// `state-changed` event; the dispatch engine emits `order-assigned`.
    pub async fn assign_order(
        &self,
        driver_id: DriverId,
        order_id: OrderId,
    ) -> Result<Driver, DispatchError> {
        let driver = self.load(driver_id).await?;
        validate_transition(&driver, DriverState::Busy)?;
        let from = driver.state;
        self.store.assign_order_tx(order_id, driver_id).await?;
        self.emit_transition(driver_id, from, DriverState::Busy);
        let mut updated = driver;
        updated.state = DriverState::Busy;
        updated.active_order = Some(order_id);
        Ok(updated)
    }

    /// Mark the pickup done. Intra-state for the driver (stays BUSY).
    pub async fn complete_pickup(
        &self,
        driver_id: DriverId,
        order_id: OrderId,
    ) -> Result<(), DispatchError> {
        let driver = self.load(driver_id).await?;
        if driver.state != DriverState::Busy {
            return Err(DispatchError::IllegalTransition {
                from: driver.state,
                to: DriverState::Busy,
                detail: "pickup while not busy".to_string(),
            });
        }
        let carries_order = driver.active_order == Some(order_id)
            || self.order_in_active_batch(&driver, order_id).await?;
        if !carries_order {
            return Err(DispatchError::Validation(format!(
                "order {order_id} is not carried by driver {driver_id}"
            )));
        }
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| DispatchError::Validation(format!("unknown order {order_id}")))?;
        if order.status != OrderStatus::Assigned {
            return Err(DispatchError::Validation(format!(
                "order {order_id} is {:?}, expected ASSIGNED",
                order.status
            )));
        }
        self.store
            .update_order_status(order_id, OrderStatus::PickedUp)
            .await?;
        self.bus.publish(FleetEvent::PickupCompleted {
            driver_id,
            order_id,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn order_in_active_batch(
        &self,
        driver: &Driver,
        order_id: OrderId,
    ) -> Result<bool, DispatchError> {
        let Some(batch_id) = driver.active_batch else {
            return Ok(false);
        };
        let Some(batch) = self.store.batch(batch_id).await? else {
            return Ok(false);
        };
        Ok(batch.order_ids.contains(&order_id))
    }

    /// Complete a delivery and route the driver to its next state:
    /// ON_BREAK when the consecutive-delivery rule fires, RETURNING when far
    /// from base, AVAILABLE otherwise. A driver mid-batch stays BUSY until
    /// the last member is delivered.
    pub async fn complete_delivery(
        &self,
        driver_id: DriverId,
        order_id: OrderId,
    ) -> Result<DeliveryOutcome, DispatchError> {
        let mut driver = self.load(driver_id).await?;
        if driver.state != DriverState::Busy {
            return Err(DispatchError::IllegalTransition {
                from: driver.state,
                to: DriverState::Available,
                detail: "delivery while not busy".to_string(),
            });
        }
        let in_batch = self.order_in_active_batch(&driver, order_id).await?;
        if driver.active_order != Some(order_id) && !in_batch {
            return Err(DispatchError::Validation(format!(
                "order {order_id} is not carried by driver {driver_id}"
            )));
        }
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| DispatchError::Validation(format!("unknown order {order_id}")))?;
        if order.status != OrderStatus::PickedUp {
            return Err(DispatchError::IllegalTransition {
                from: driver.state,
                to: driver.state,
                detail: format!("delivery completion without pickup for order {order_id}"),
            });
        }

        self.store
            .update_order_status(order_id, OrderStatus::Delivered)
            .await?;
        self.bus.publish(FleetEvent::DeliveryCompleted {
            driver_id,
            order_id,
            at: Utc::now(),
        });

        driver.completed_today += 1;
        driver.consecutive_deliveries += 1;

        let batch_done = if in_batch {
            self.settle_batch_member(&driver).await?
        } else {
            driver.active_order = None;
            true
        };

        if !batch_done {
            // More batch stops ahead; the driver stays BUSY.
            self.store.update_driver(&driver).await?;
            return Ok(DeliveryOutcome {
                next_state: DriverState::Busy,
                break_required: false,
                driver,
            });
        }
        driver.active_batch = None;

        let needs_break = driver.requires_break_after > 0
            && driver.consecutive_deliveries >= driver.requires_break_after;
        if needs_break {
            self.bus.publish(FleetEvent::BreakRequired {
                driver_id,
                consecutive_deliveries: driver.consecutive_deliveries,
                at: Utc::now(),
            });
        }
        let distance_from_base_km = haversine_km(driver.position, self.config.base);
        let next_state = next_state_after_delivery(
            needs_break,
            distance_from_base_km,
            self.config.return_distance_km,
        );

        let from = driver.state;
        driver.state = next_state;
        self.store.update_driver(&driver).await?;
        self.emit_transition(driver_id, from, next_state);

        Ok(DeliveryOutcome {
            next_state,
            break_required: needs_break,
            driver,
        })
    }

    /// Returns `true` when the driver's batch has no undelivered members
    /// left (and marks the batch COMPLETED in that case).
    async fn settle_batch_member(&self, driver: &Driver) -> Result<bool, DispatchError> {
        let Some(batch_id) = driver.active_batch else {
            return Ok(true);
        };
        let Some(batch) = self.store.batch(batch_id).await? else {
            return Ok(true);
        };
        for member_id in &batch.order_ids {
            let Some(member) = self.store.order(*member_id).await? else {
                continue;
            };
            if !member.status.is_terminal() {
                return Ok(false);
            }
        }
        self.store
            .update_batch_status(batch_id, BatchStatus::Completed)
            .await?;
        Ok(true)
    }

    pub async fn update_location(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
    ) -> Result<(), DispatchError> {
        let mut driver = self.load(driver_id).await?;
        driver.position = position;
        self.store.update_driver(&driver).await?;
        self.bus.publish(FleetEvent::LocationUpdated {
            driver_id,
            position,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Bulk location update; a bad row is logged and skipped, the rest of
    /// the batch still lands.
    pub async fn batch_update_locations(
        &self,
        updates: &[(DriverId, GeoPoint)],
    ) -> Result<usize, DispatchError> {
        let mut applied = 0;
        for (driver_id, position) in updates {
            match self.update_location(*driver_id, *position).await {
                Ok(()) => applied += 1,
                Err(err) => warn!(%driver_id, %err, "location update skipped"),
            }
        }
        Ok(applied)
    }

    /// Daily boundary reset of per-day counters across the fleet.
    pub async fn reset_daily_metrics(&self) -> Result<u64, DispatchError> {
        let drivers_reset = self.store.reset_daily_metrics().await?;
        self.bus.publish(FleetEvent::DailyReset {
            drivers_reset,
            at: Utc::now(),
        });
        info!(drivers_reset, "daily metrics reset");
        Ok(drivers_reset)
    }

    pub async fn fleet_status(&self) -> Result<FleetStatus, DispatchError> {
        let drivers = self.store.all_drivers().await?;
        let mut status = FleetStatus {
            total: drivers.len(),
            ..Default::default()
        };
        let mut rating_sum = 0.0;
        let mut on_duty = 0usize;
        let mut busy = 0usize;
        for driver in &drivers {
            *status.by_state.entry(driver.state).or_insert(0) += 1;
            if let Some(reason) = unavailability_reason(driver) {
                *status
                    .unavailable_by_reason
                    .entry(reason.label())
                    .or_insert(0) += 1;
            }
            rating_sum += driver.rating;
            if driver.state != DriverState::Offline {
                on_duty += 1;
            }
            if driver.state == DriverState::Busy {
                busy += 1;
            }
        }
        if !drivers.is_empty() {
            status.average_rating = rating_sum / drivers.len() as f64;
        }
        if on_duty > 0 {
            status.utilization = busy as f64 / on_duty as f64;
        }
        Ok(status)
    }
}
