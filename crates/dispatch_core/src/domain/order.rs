//! Order row, service classes, and delivery lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, DriverId, OrderId};
use crate::spatial::GeoPoint;

/// The two delivery service classes. Express is the fast lane with a tight
/// SLA; Standard gets the wider window and is the only class eligible for
/// batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    Express,
    Standard,
}

impl ServiceClass {
    /// Default SLA minutes applied at order creation when none is supplied.
    pub fn default_sla_minutes(&self) -> i64 {
        match self {
            ServiceClass::Express => 60,
            ServiceClass::Standard => 240,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::Express => "express",
            ServiceClass::Standard => "standard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "express" => Some(ServiceClass::Express),
            "standard" => Some(ServiceClass::Standard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
    Failed,
    Returned,
}

impl OrderStatus {
    /// Terminal statuses are never advanced again by any engine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::Failed
                | OrderStatus::Returned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Returned => "RETURNED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "ASSIGNED" => Some(OrderStatus::Assigned),
            "PICKED_UP" => Some(OrderStatus::PickedUp),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "FAILED" => Some(OrderStatus::Failed),
            "RETURNED" => Some(OrderStatus::Returned),
            _ => None,
        }
    }
}

/// A delivery order as persisted in the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Customer-facing tracking number.
    pub tracking_number: String,
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub dropoff: GeoPoint,
    pub dropoff_address: String,
    pub service_class: ServiceClass,
    pub created_at: DateTime<Utc>,
    /// Hard deadline derived from the service class at creation.
    /// Invariant: `sla_deadline > created_at`.
    pub sla_deadline: DateTime<Utc>,
    pub status: OrderStatus,
    pub driver_id: Option<DriverId>,
    /// Times this order has been handed over to a different driver.
    /// Bounded by `MAX_REASSIGNMENT_ATTEMPTS`.
    pub reassignment_count: u32,
    pub last_reassignment_reason: Option<String>,
    pub batch_id: Option<BatchId>,
    pub weight_kg: f64,
    /// Projected delivery time, written back by batching / dispatch.
    pub delivery_eta: Option<DateTime<Utc>>,
}

impl Order {
    /// Minutes until the SLA deadline; negative once breached.
    pub fn minutes_to_deadline(&self, now: DateTime<Utc>) -> f64 {
        (self.sla_deadline - now).num_seconds() as f64 / 60.0
    }

    /// Age of the order in minutes.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Returned.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Assigned.is_terminal());
        assert!(!OrderStatus::PickedUp.is_terminal());
    }

    #[test]
    fn minutes_to_deadline_goes_negative_after_breach() {
        let now = Utc::now();
        let mut order = crate::test_helpers::make_order();
        order.sla_deadline = now - Duration::minutes(5);
        assert!(order.minutes_to_deadline(now) < 0.0);
        order.sla_deadline = now + Duration::minutes(30);
        let m = order.minutes_to_deadline(now);
        assert!((m - 30.0).abs() < 0.1, "got {m}");
    }

    #[test]
    fn default_sla_minutes_per_class() {
        assert_eq!(ServiceClass::Express.default_sla_minutes(), 60);
        assert_eq!(ServiceClass::Standard.default_sla_minutes(), 240);
    }
}
