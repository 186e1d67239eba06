//! Hybrid route optimizer.
//!
//! Chooses between the external CVRP solver (large batches, capacity
//! pressure, fairness) and the fast travel-matrix path (small or
//! latency-critical requests), always probing CVRP health before committing
//! to it and always able to downgrade. The result is normalized into the
//! shared [`Route`] shape whatever path produced it.

pub mod cvrp;
pub mod fallback;

pub use cvrp::{CvrpClient, CvrpLocation, CvrpPoint, CvrpRequest, CvrpRoute, CvrpVehicle};
pub use fallback::naive_route;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::OptimizerConfig;
use crate::domain::{DriverId, OrderId, Route, RouteEngine, StopKind};
use crate::matrix::{MatrixCache, TravelMatrix};
use crate::spatial::GeoPoint;

use self::cvrp::CvrpTimeWindow;
use self::fallback::{build_route, matrix_coords};

/// One delivery job handed to the optimizer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub order_id: OrderId,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub demand_kg: f64,
    pub deadline: DateTime<Utc>,
}

/// Internal planned stop with its index into the matrix coordinate list.
#[derive(Debug, Clone)]
pub(crate) struct StopPlan {
    pub order_id: Option<OrderId>,
    pub kind: StopKind,
    pub location: GeoPoint,
    pub demand_kg: f64,
    pub matrix_index: usize,
}

/// A single-vehicle optimization request.
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub driver_id: DriverId,
    pub start: GeoPoint,
    pub capacity_kg: f64,
    pub deliveries: Vec<Delivery>,
    /// Base to return to after the last delivery; omitted for open routes.
    pub return_to: Option<GeoPoint>,
    /// SLA minutes of the batch's service class.
    pub sla_minutes: i64,
    /// Caller preference; `None` lets the size rule decide.
    pub use_cvrp: Option<bool>,
}

/// A vehicle participating in the enhanced multi-vehicle mode.
#[derive(Debug, Clone)]
pub struct FleetVehicle {
    pub driver_id: DriverId,
    pub start: GeoPoint,
    pub capacity_kg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineChoice {
    Cvrp,
    FastMatrix,
}

/// The engine decision plus why it was made, recorded for observability.
#[derive(Debug, Clone)]
pub struct EngineDecision {
    pub choice: EngineChoice,
    pub reason: &'static str,
    pub cvrp_healthy: Option<bool>,
}

/// Vehicles worth spinning up for a delivery set:
/// `min(available, ⌈deliveries·10 / sla_minutes⌉)`, at least one. With
/// surplus capacity every available vehicle gets used.
pub fn vehicles_needed(delivery_count: usize, available: usize, sla_minutes: i64) -> usize {
    if available == 0 {
        return 0;
    }
    let sla = sla_minutes.max(1) as f64;
    let needed = ((delivery_count as f64 * 10.0) / sla).ceil() as usize;
    needed.clamp(1, available)
}

pub struct RouteOptimizer {
    cvrp: CvrpClient,
    matrix: Arc<MatrixCache>,
    config: OptimizerConfig,
}

impl RouteOptimizer {
    pub fn new(cvrp: CvrpClient, matrix: Arc<MatrixCache>, config: OptimizerConfig) -> Self {
        Self {
            cvrp,
            matrix,
            config,
        }
    }

    /// Pick the engine for a request of `n` deliveries. CVRP is only ever
    /// chosen after a passing health probe.
    pub async fn decide_engine(&self, n: usize, use_cvrp: Option<bool>) -> EngineDecision {
        if !self.config.cvrp_enabled {
            return EngineDecision {
                choice: EngineChoice::FastMatrix,
                reason: "cvrp globally disabled",
                cvrp_healthy: None,
            };
        }
        match use_cvrp {
            Some(false) => EngineDecision {
                choice: EngineChoice::FastMatrix,
                reason: "caller requested fast matrix",
                cvrp_healthy: None,
            },
            Some(true) => self.probe_then(EngineChoice::Cvrp, "caller requested cvrp").await,
            None if n >= self.config.cvrp_auto_threshold => {
                self.probe_then(EngineChoice::Cvrp, "large delivery set").await
            }
            None => EngineDecision {
                choice: EngineChoice::FastMatrix,
                reason: "small delivery set",
                cvrp_healthy: None,
            },
        }
    }

    async fn probe_then(&self, choice: EngineChoice, reason: &'static str) -> EngineDecision {
        let healthy = self.cvrp.health(self.config.health_timeout).await;
        if healthy {
            EngineDecision {
                choice,
                reason,
                cvrp_healthy: Some(true),
            }
        } else {
            EngineDecision {
                choice: EngineChoice::FastMatrix,
                reason: "cvrp health probe failed",
                cvrp_healthy: Some(false),
            }
        }
    }

    /// Produce a route for one vehicle. Infallible: CVRP failure downgrades
    /// to the fast matrix path, which itself degrades to the naive plan.
    pub async fn optimize(&self, request: &OptimizeRequest) -> Route {
        let decision = self
            .decide_engine(request.deliveries.len(), request.use_cvrp)
            .await;
        info!(
            choice = ?decision.choice,
            reason = decision.reason,
            deliveries = request.deliveries.len(),
            "route engine selected"
        );

        let coords = matrix_coords(request.start, &request.deliveries, request.return_to);
        let matrix = self.matrix.get_matrix(&coords).await;

        let mut route = match decision.choice {
            EngineChoice::Cvrp => match self.solve_cvrp(request, &matrix).await {
                Ok(route) => route,
                Err(reason) => {
                    warn!(%reason, "cvrp solve failed, downgrading to fast matrix");
                    self.fast_matrix_route(request, &matrix, Some(reason))
                }
            },
            EngineChoice::FastMatrix => self.fast_matrix_route(request, &matrix, None),
        };

        if !route.is_well_formed(request.capacity_kg) {
            warn!("optimized route violated invariants, using naive fallback");
            route = naive_route(
                request.driver_id,
                &request.deliveries,
                request.return_to,
                &matrix,
                Utc::now(),
                Some("optimized route failed validation".to_string()),
            );
        }
        route
    }

    /// Fast path: all pickups (nearest-first by travel time), then
    /// deliveries nearest-first. Pickup-before-delivery holds by
    /// construction.
    fn fast_matrix_route(
        &self,
        request: &OptimizeRequest,
        matrix: &TravelMatrix,
        fallback_reason: Option<String>,
    ) -> Route {
        let n = request.deliveries.len();
        if n == 0 {
            return naive_route(
                request.driver_id,
                &request.deliveries,
                request.return_to,
                matrix,
                Utc::now(),
                fallback_reason,
            );
        }

        let mut plan: Vec<StopPlan> = Vec::with_capacity(2 * n + 1);
        let mut current = 0usize;

        // Pickups: indices 1..=n in the matrix.
        let mut remaining: Vec<usize> = (0..n).collect();
        while !remaining.is_empty() {
            let (pos, &i) = remaining
                .iter()
                .enumerate()
                .min_by(|(_, &a), (_, &b)| {
                    matrix.durations[current][1 + a]
                        .partial_cmp(&matrix.durations[current][1 + b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("remaining is non-empty");
            let delivery = &request.deliveries[i];
            plan.push(StopPlan {
                order_id: Some(delivery.order_id),
                kind: StopKind::Pickup,
                location: delivery.pickup,
                demand_kg: delivery.demand_kg,
                matrix_index: 1 + i,
            });
            current = 1 + i;
            remaining.swap_remove(pos);
        }

        // Deliveries: indices n+1..=2n.
        let mut remaining: Vec<usize> = (0..n).collect();
        while !remaining.is_empty() {
            let (pos, &i) = remaining
                .iter()
                .enumerate()
                .min_by(|(_, &a), (_, &b)| {
                    matrix.durations[current][1 + n + a]
                        .partial_cmp(&matrix.durations[current][1 + n + b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("remaining is non-empty");
            let delivery = &request.deliveries[i];
            plan.push(StopPlan {
                order_id: Some(delivery.order_id),
                kind: StopKind::Delivery,
                location: delivery.dropoff,
                demand_kg: delivery.demand_kg,
                matrix_index: 1 + n + i,
            });
            current = 1 + n + i;
            remaining.swap_remove(pos);
        }

        if let Some(base) = request.return_to {
            plan.push(StopPlan {
                order_id: None,
                kind: StopKind::Return,
                location: base,
                demand_kg: 0.0,
                matrix_index: 1 + 2 * n,
            });
        }

        build_route(
            request.driver_id,
            &plan,
            matrix,
            Utc::now(),
            RouteEngine::FastMatrix,
            fallback_reason,
        )
    }

    /// CVRP path: the solver orders the dropoffs; pickups are prepended in
    /// cluster order and ETAs recomputed from the matrix so the normalized
    /// route satisfies the same invariants as every other engine's output.
    async fn solve_cvrp(
        &self,
        request: &OptimizeRequest,
        matrix: &TravelMatrix,
    ) -> Result<Route, String> {
        let cvrp_request = CvrpRequest {
            depot: CvrpPoint {
                lat: request.start.lat,
                lng: request.start.lng,
            },
            locations: request
                .deliveries
                .iter()
                .map(|delivery| CvrpLocation {
                    id: delivery.order_id.to_string(),
                    lat: delivery.dropoff.lat,
                    lng: delivery.dropoff.lng,
                    demand: delivery.demand_kg,
                    time_window: Some(CvrpTimeWindow {
                        start: Utc::now().timestamp(),
                        end: delivery.deadline.timestamp(),
                    }),
                })
                .collect(),
            vehicles: vec![CvrpVehicle {
                id: request.driver_id.to_string(),
                capacity: request.capacity_kg,
            }],
            time_budget_sec: self.config.solver_time_budget_secs,
        };

        let routes = self
            .cvrp
            .solve(&cvrp_request)
            .await
            .map_err(|err| err.to_string())?;
        let solved = routes.first().ok_or("solver returned no routes")?;

        // Map solver stops back onto our delivery set by order id.
        let by_id: HashMap<String, usize> = request
            .deliveries
            .iter()
            .enumerate()
            .map(|(i, d)| (d.order_id.to_string(), i))
            .collect();

        let n = request.deliveries.len();
        let mut plan: Vec<StopPlan> = Vec::with_capacity(2 * n + 1);
        for (i, delivery) in request.deliveries.iter().enumerate() {
            plan.push(StopPlan {
                order_id: Some(delivery.order_id),
                kind: StopKind::Pickup,
                location: delivery.pickup,
                demand_kg: delivery.demand_kg,
                matrix_index: 1 + i,
            });
        }
        for stop in &solved.stops {
            let Some(&i) = by_id.get(&stop.location_id) else {
                return Err(format!("solver stop references unknown id {}", stop.location_id));
            };
            let delivery = &request.deliveries[i];
            plan.push(StopPlan {
                order_id: Some(delivery.order_id),
                kind: StopKind::Delivery,
                location: delivery.dropoff,
                demand_kg: delivery.demand_kg,
                matrix_index: 1 + n + i,
            });
        }
        if plan.len() != 2 * n {
            return Err("solver dropped deliveries".to_string());
        }
        if let Some(base) = request.return_to {
            plan.push(StopPlan {
                order_id: None,
                kind: StopKind::Return,
                location: base,
                demand_kg: 0.0,
                matrix_index: 1 + 2 * n,
            });
        }

        let mut route = build_route(
            request.driver_id,
            &plan,
            matrix,
            Utc::now(),
            RouteEngine::Cvrp,
            None,
        );
        if solved.total_distance > 0.0 {
            route.total_distance_km = solved.total_distance / 1000.0;
        }
        Ok(route)
    }

    /// Enhanced multi-vehicle mode: round-robin the deliveries of each
    /// pickup across `vehicles_needed` vehicles, then optimize each
    /// vehicle's share independently. Guarantees surplus vehicles get used.
    pub async fn optimize_fleet(
        &self,
        fleet: &[FleetVehicle],
        deliveries: &[Delivery],
        sla_minutes: i64,
        use_cvrp: Option<bool>,
    ) -> Vec<Route> {
        let k = vehicles_needed(deliveries.len(), fleet.len(), sla_minutes);
        if k == 0 {
            return Vec::new();
        }

        // Group by pickup so each merchant's jobs spread evenly.
        let mut by_pickup: HashMap<(i64, i64), Vec<&Delivery>> = HashMap::new();
        for delivery in deliveries {
            let key = (
                (delivery.pickup.lat * 1e5).round() as i64,
                (delivery.pickup.lng * 1e5).round() as i64,
            );
            by_pickup.entry(key).or_default().push(delivery);
        }
        let mut groups: Vec<_> = by_pickup.into_values().collect();
        // Stable order regardless of map iteration order.
        groups.sort_by_key(|group| (group.len(), group[0].order_id));

        let mut shares: Vec<Vec<Delivery>> = vec![Vec::new(); k];
        let mut cursor = 0usize;
        for group in groups {
            for delivery in group {
                shares[cursor % k].push(delivery.clone());
                cursor += 1;
            }
        }

        let mut routes = Vec::with_capacity(k);
        for (vehicle, share) in fleet.iter().take(k).zip(shares) {
            if share.is_empty() {
                continue;
            }
            let request = OptimizeRequest {
                driver_id: vehicle.driver_id,
                start: vehicle.start,
                capacity_kg: vehicle.capacity_kg,
                deliveries: share,
                return_to: None,
                sla_minutes,
                use_cvrp,
            };
            routes.push(self.optimize(&request).await);
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatrixConfig;
    use crate::routing::TableClient;
    use crate::test_helpers::make_delivery;
    use std::time::Duration;
    use uuid::Uuid;

    fn offline_optimizer(cvrp_enabled: bool) -> RouteOptimizer {
        // Both external services unreachable: CVRP downgrades, the matrix
        // degrades to haversine, and everything stays deterministic.
        let cvrp = CvrpClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        let router = TableClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        let matrix = Arc::new(MatrixCache::new(None, router, MatrixConfig::default()));
        RouteOptimizer::new(
            cvrp,
            matrix,
            OptimizerConfig {
                cvrp_enabled,
                health_timeout: Duration::from_millis(300),
                ..OptimizerConfig::default()
            },
        )
    }

    fn two_deliveries() -> Vec<Delivery> {
        vec![
            make_delivery(GeoPoint::new(52.52, 13.40), GeoPoint::new(52.53, 13.42)),
            make_delivery(GeoPoint::new(52.52, 13.40), GeoPoint::new(52.54, 13.44)),
        ]
    }

    #[test]
    fn vehicles_needed_formula() {
        // 12 deliveries, 4 vehicles, 60 min SLA → ceil(120/60) = 2.
        assert_eq!(vehicles_needed(12, 4, 60), 2);
        // Tight SLA pulls in every vehicle.
        assert_eq!(vehicles_needed(30, 4, 60), 4);
        assert_eq!(vehicles_needed(1, 4, 240), 1);
        assert_eq!(vehicles_needed(5, 0, 60), 0);
    }

    #[tokio::test]
    async fn disabled_cvrp_always_picks_fast_matrix() {
        let optimizer = offline_optimizer(false);
        let decision = optimizer.decide_engine(100, Some(true)).await;
        assert_eq!(decision.choice, EngineChoice::FastMatrix);
        assert_eq!(decision.reason, "cvrp globally disabled");
    }

    #[tokio::test]
    async fn unhealthy_cvrp_downgrades() {
        let optimizer = offline_optimizer(true);
        let decision = optimizer.decide_engine(100, None).await;
        assert_eq!(decision.choice, EngineChoice::FastMatrix);
        assert_eq!(decision.cvrp_healthy, Some(false));
    }

    #[tokio::test]
    async fn small_sets_skip_the_probe() {
        let optimizer = offline_optimizer(true);
        let decision = optimizer.decide_engine(3, None).await;
        assert_eq!(decision.choice, EngineChoice::FastMatrix);
        assert_eq!(decision.reason, "small delivery set");
        assert_eq!(decision.cvrp_healthy, None);
    }

    #[tokio::test]
    async fn optimize_produces_a_well_formed_route_offline() {
        let optimizer = offline_optimizer(true);
        let request = OptimizeRequest {
            driver_id: Uuid::new_v4(),
            start: GeoPoint::new(52.51, 13.38),
            capacity_kg: 20.0,
            deliveries: two_deliveries(),
            return_to: Some(GeoPoint::new(52.50, 13.35)),
            sla_minutes: 240,
            use_cvrp: Some(true),
        };
        let route = optimizer.optimize(&request).await;
        // CVRP is unreachable, so the result must be a downgraded engine.
        assert_ne!(route.engine, RouteEngine::Cvrp);
        assert!(route.is_well_formed(20.0));
        assert_eq!(route.stops.len(), 5);
    }

    #[tokio::test]
    async fn fleet_mode_uses_all_needed_vehicles() {
        let optimizer = offline_optimizer(false);
        let fleet: Vec<FleetVehicle> = (0..3)
            .map(|i| FleetVehicle {
                driver_id: Uuid::new_v4(),
                start: GeoPoint::new(52.51 + 0.01 * i as f64, 13.38),
                capacity_kg: 20.0,
            })
            .collect();
        let deliveries: Vec<Delivery> = (0..12)
            .map(|i| {
                make_delivery(
                    GeoPoint::new(52.52, 13.40),
                    GeoPoint::new(52.53 + 0.002 * i as f64, 13.42),
                )
            })
            .collect();

        // 12 deliveries at 40 min SLA → ceil(3.0) = 3 vehicles.
        let routes = optimizer.optimize_fleet(&fleet, &deliveries, 40, None).await;
        assert_eq!(routes.len(), 3);
        let total_stops: usize = routes
            .iter()
            .map(|route| {
                route
                    .stops
                    .iter()
                    .filter(|s| s.kind == StopKind::Delivery)
                    .count()
            })
            .sum();
        assert_eq!(total_stops, 12);
        for route in &routes {
            assert!(route.is_well_formed(20.0));
        }
    }
}
