//! Driver row and operational state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchId, DriverId, OrderId, ServiceClass};
use crate::spatial::GeoPoint;

/// Operational state of a driver. Transitions are validated by the driver
/// state engine ([`crate::drivers`]); nothing else writes this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    Available,
    Busy,
    Returning,
    OnBreak,
    Offline,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Available => "AVAILABLE",
            DriverState::Busy => "BUSY",
            DriverState::Returning => "RETURNING",
            DriverState::OnBreak => "ON_BREAK",
            DriverState::Offline => "OFFLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(DriverState::Available),
            "BUSY" => Some(DriverState::Busy),
            "RETURNING" => Some(DriverState::Returning),
            "ON_BREAK" => Some(DriverState::OnBreak),
            "OFFLINE" => Some(DriverState::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bicycle,
    Motorcycle,
    Car,
    Van,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Bicycle => "bicycle",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Car => "car",
            VehicleType::Van => "van",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bicycle" => Some(VehicleType::Bicycle),
            "motorcycle" => Some(VehicleType::Motorcycle),
            "car" => Some(VehicleType::Car),
            "van" => Some(VehicleType::Van),
            _ => None,
        }
    }
}

/// A fleet driver as persisted in the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub position: GeoPoint,
    pub state: DriverState,
    pub vehicle_type: VehicleType,
    /// Maximum payload the vehicle carries, kg.
    pub capacity_kg: f64,
    /// Payload currently on board, kg.
    pub current_load_kg: f64,
    /// Service classes this driver may serve.
    pub service_classes: Vec<ServiceClass>,
    /// Inactive drivers are invisible to dispatch regardless of state.
    pub active: bool,
    /// Customer rating, 0.0–5.0.
    pub rating: f64,
    /// Rolling on-time delivery rate, 0.0–1.0. `None` for new drivers.
    pub on_time_rate: Option<f64>,
    pub completed_today: u32,
    pub target_deliveries: u32,
    /// Deliveries since the last break. Reset on break end and shift start.
    pub consecutive_deliveries: u32,
    /// Mandatory break kicks in at this many consecutive deliveries.
    pub requires_break_after: u32,
    pub hours_worked_today: f64,
    pub max_hours_per_day: f64,
    /// The single in-flight order while BUSY with a single assignment.
    pub active_order: Option<OrderId>,
    /// The in-flight batch while BUSY with a multi-stop route.
    pub active_batch: Option<BatchId>,
    pub shift_started_at: Option<DateTime<Utc>>,
}

impl Driver {
    /// Deliveries still owed against the daily target. Zero once met.
    pub fn gap_from_target(&self) -> u32 {
        self.target_deliveries.saturating_sub(self.completed_today)
    }

    /// Residual payload capacity, kg.
    pub fn residual_capacity_kg(&self) -> f64 {
        (self.capacity_kg - self.current_load_kg).max(0.0)
    }

    pub fn serves(&self, class: ServiceClass) -> bool {
        self.service_classes.contains(&class)
    }

    pub fn has_active_work(&self) -> bool {
        self.active_order.is_some() || self.active_batch.is_some()
    }
}
