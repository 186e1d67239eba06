//! Route and stop sequence for a driver covering one batch.
//!
//! Invariants enforced by the builders in [`crate::optimizer`]:
//!
//! - every delivery stop is preceded by its matching pickup,
//! - `cumulative_load_kg` never exceeds vehicle capacity,
//! - ETAs are monotonically non-decreasing along the stop sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, DriverId, OrderId};
use crate::spatial::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopKind {
    Pickup,
    Delivery,
    Return,
}

impl StopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopKind::Pickup => "PICKUP",
            StopKind::Delivery => "DELIVERY",
            StopKind::Return => "RETURN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PICKUP" => Some(StopKind::Pickup),
            "DELIVERY" => Some(StopKind::Delivery),
            "RETURN" => Some(StopKind::Return),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    /// `None` only for the terminal return-to-base stop.
    pub order_id: Option<OrderId>,
    pub kind: StopKind,
    pub location: GeoPoint,
    pub eta: DateTime<Utc>,
    /// Load on board after servicing this stop, kg.
    pub cumulative_load_kg: f64,
}

/// Which solver produced a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteEngine {
    Cvrp,
    FastMatrix,
    Naive,
}

impl RouteEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteEngine::Cvrp => "cvrp",
            RouteEngine::FastMatrix => "fast_matrix",
            RouteEngine::Naive => "naive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub driver_id: DriverId,
    pub batch_id: Option<BatchId>,
    pub stops: Vec<RouteStop>,
    pub total_distance_km: f64,
    pub total_duration_secs: f64,
    pub engine: RouteEngine,
    /// Populated when a solver failure forced a downgrade.
    pub fallback_reason: Option<String>,
}

impl Route {
    /// Check the pickup-before-delivery and monotone-ETA invariants.
    /// Used by tests and by the optimizer before persisting.
    pub fn is_well_formed(&self, capacity_kg: f64) -> bool {
        let mut last_eta: Option<DateTime<Utc>> = None;
        for (idx, stop) in self.stops.iter().enumerate() {
            if stop.cumulative_load_kg > capacity_kg + f64::EPSILON {
                return false;
            }
            if let Some(prev) = last_eta {
                if stop.eta < prev {
                    return false;
                }
            }
            last_eta = Some(stop.eta);
            if stop.kind == StopKind::Delivery {
                let Some(order_id) = stop.order_id else {
                    return false;
                };
                let picked_up = self.stops[..idx].iter().any(|s| {
                    s.kind == StopKind::Pickup && s.order_id == Some(order_id)
                });
                if !picked_up {
                    return false;
                }
            }
        }
        true
    }
}
