//! Batch row: a set of 2–5 same-class orders carried on one multi-stop route.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, DriverId, OrderId, ServiceClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Assigned,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Assigned => "ASSIGNED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BatchStatus::Pending),
            "ASSIGNED" => Some(BatchStatus::Assigned),
            "COMPLETED" => Some(BatchStatus::Completed),
            "CANCELLED" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }
}

/// Invariants: all member orders share `service_class`, 2 ≤ members ≤ 5, and
/// the SLA spread across members stays within the configured bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Human-readable batch number, e.g. `BT-20260801-0001`.
    pub number: String,
    pub order_ids: Vec<OrderId>,
    pub service_class: ServiceClass,
    pub driver_id: Option<DriverId>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}
