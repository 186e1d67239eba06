//! Deterministic route builders shared by the optimizer and batching.
//!
//! `naive_route` is the last-resort builder: driver → every pickup in
//! cluster order → every delivery in cluster order → return. It needs only
//! a travel matrix (which itself degrades to haversine), so it always
//! succeeds.

use chrono::{DateTime, Duration, Utc};

use super::{Delivery, StopPlan};
use crate::domain::{DriverId, Route, RouteEngine, RouteStop, StopKind};
use crate::matrix::TravelMatrix;
use crate::spatial::GeoPoint;

/// Walk a sequence of matrix indices and accumulate per-leg ETAs.
/// Returns `(etas, total_distance_m, total_duration_secs)`.
pub(super) fn walk_legs(
    matrix: &TravelMatrix,
    sequence: &[usize],
    start_index: usize,
    departure: DateTime<Utc>,
) -> (Vec<DateTime<Utc>>, f64, f64) {
    let mut etas = Vec::with_capacity(sequence.len());
    let mut current = start_index;
    let mut distance_m = 0.0;
    let mut duration_s = 0.0;
    for &next in sequence {
        distance_m += matrix.distances[current][next];
        duration_s += matrix.durations[current][next];
        etas.push(departure + Duration::seconds(duration_s.round() as i64));
        current = next;
    }
    (etas, distance_m, duration_s)
}

/// Materialize a stop plan into the shared route shape.
pub(super) fn build_route(
    driver_id: DriverId,
    plan: &[StopPlan],
    matrix: &TravelMatrix,
    departure: DateTime<Utc>,
    engine: RouteEngine,
    fallback_reason: Option<String>,
) -> Route {
    let sequence: Vec<usize> = plan.iter().map(|stop| stop.matrix_index).collect();
    let (etas, distance_m, duration_s) = walk_legs(matrix, &sequence, 0, departure);

    let mut load = 0.0;
    let stops = plan
        .iter()
        .zip(etas)
        .map(|(stop, eta)| {
            match stop.kind {
                StopKind::Pickup => load += stop.demand_kg,
                StopKind::Delivery => load = (load - stop.demand_kg).max(0.0),
                StopKind::Return => load = 0.0,
            }
            RouteStop {
                order_id: stop.order_id,
                kind: stop.kind,
                location: stop.location,
                eta,
                cumulative_load_kg: load,
            }
        })
        .collect();

    Route {
        driver_id,
        batch_id: None,
        stops,
        total_distance_km: distance_m / 1000.0,
        total_duration_secs: duration_s,
        engine,
        fallback_reason,
    }
}

/// Stop plan in cluster order: all pickups, then all deliveries, then an
/// optional return. Matrix layout is `[start, pickups..., dropoffs...,
/// return?]`.
pub(super) fn naive_plan(deliveries: &[Delivery], return_to: Option<GeoPoint>) -> Vec<StopPlan> {
    let n = deliveries.len();
    let mut plan = Vec::with_capacity(2 * n + 1);
    for (i, delivery) in deliveries.iter().enumerate() {
        plan.push(StopPlan {
            order_id: Some(delivery.order_id),
            kind: StopKind::Pickup,
            location: delivery.pickup,
            demand_kg: delivery.demand_kg,
            matrix_index: 1 + i,
        });
    }
    for (i, delivery) in deliveries.iter().enumerate() {
        plan.push(StopPlan {
            order_id: Some(delivery.order_id),
            kind: StopKind::Delivery,
            location: delivery.dropoff,
            demand_kg: delivery.demand_kg,
            matrix_index: 1 + n + i,
        });
    }
    if let Some(base) = return_to {
        plan.push(StopPlan {
            order_id: None,
            kind: StopKind::Return,
            location: base,
            demand_kg: 0.0,
            matrix_index: 1 + 2 * n,
        });
    }
    plan
}

/// The full coordinate list backing the matrix for a delivery set:
/// `[start, pickups..., dropoffs..., return?]`.
pub(super) fn matrix_coords(
    start: GeoPoint,
    deliveries: &[Delivery],
    return_to: Option<GeoPoint>,
) -> Vec<GeoPoint> {
    let mut coords = Vec::with_capacity(2 * deliveries.len() + 2);
    coords.push(start);
    coords.extend(deliveries.iter().map(|d| d.pickup));
    coords.extend(deliveries.iter().map(|d| d.dropoff));
    if let Some(base) = return_to {
        coords.push(base);
    }
    coords
}

/// Last-resort route: pickups then deliveries in cluster order, then the
/// return leg. The matrix must be laid out by [`matrix_coords`], with the
/// driver's start at index 0.
pub fn naive_route(
    driver_id: DriverId,
    deliveries: &[Delivery],
    return_to: Option<GeoPoint>,
    matrix: &TravelMatrix,
    departure: DateTime<Utc>,
    fallback_reason: Option<String>,
) -> Route {
    let plan = naive_plan(deliveries, return_to);
    build_route(
        driver_id,
        &plan,
        matrix,
        departure,
        RouteEngine::Naive,
        fallback_reason,
    )
}
