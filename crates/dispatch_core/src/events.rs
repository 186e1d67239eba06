//! Typed event bus.
//!
//! Every engine mutation publishes exactly one [`FleetEvent`] per lifecycle
//! fact, in transition order, on a broadcast channel. Downstream sinks
//! (notifications, metrics) subscribe; the engines never call them directly
//! and never register listeners on the hot path.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain::{BatchId, DriverId, DriverState, OrderId};
use crate::monitoring::{AlertKind, ErrorCategory, ErrorSeverity};
use crate::spatial::GeoPoint;

/// Default channel capacity. A lagging subscriber loses the oldest events;
/// publication itself never blocks or fails.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum FleetEvent {
    StateChanged {
        driver_id: DriverId,
        from: DriverState,
        to: DriverState,
        at: DateTime<Utc>,
    },
    PickupCompleted {
        driver_id: DriverId,
        order_id: OrderId,
        at: DateTime<Utc>,
    },
    DeliveryCompleted {
        driver_id: DriverId,
        order_id: OrderId,
        at: DateTime<Utc>,
    },
    BreakRequired {
        driver_id: DriverId,
        consecutive_deliveries: u32,
        at: DateTime<Utc>,
    },
    BreakStarted {
        driver_id: DriverId,
        at: DateTime<Utc>,
    },
    BreakEnded {
        driver_id: DriverId,
        at: DateTime<Utc>,
    },
    ShiftStarted {
        driver_id: DriverId,
        at: DateTime<Utc>,
    },
    ShiftEnded {
        driver_id: DriverId,
        at: DateTime<Utc>,
    },
    LocationUpdated {
        driver_id: DriverId,
        position: GeoPoint,
        at: DateTime<Utc>,
    },
    DailyReset {
        drivers_reset: u64,
        at: DateTime<Utc>,
    },
    OrderAssigned {
        order_id: OrderId,
        driver_id: DriverId,
        score: f64,
        eta_minutes: f64,
        at: DateTime<Utc>,
    },
    BatchCreated {
        batch_id: BatchId,
        driver_id: DriverId,
        order_count: usize,
        at: DateTime<Utc>,
    },
    ReassignmentSucceeded {
        order_id: OrderId,
        from_driver: Option<DriverId>,
        to_driver: DriverId,
        attempt: u32,
        at: DateTime<Utc>,
    },
    ReassignmentFailed {
        order_id: OrderId,
        reason: String,
        at: DateTime<Utc>,
    },
    SlaBreach {
        order_id: OrderId,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    EscalationRequired {
        order_id: OrderId,
        reason: String,
        at: DateTime<Utc>,
    },
    ErrorTracked {
        category: ErrorCategory,
        severity: ErrorSeverity,
        code: Option<String>,
        at: DateTime<Utc>,
    },
    Alert {
        kind: AlertKind,
        message: String,
        observed: f64,
        threshold: f64,
        at: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::StateChanged { .. } => "state-changed",
            FleetEvent::PickupCompleted { .. } => "pickup-completed",
            FleetEvent::DeliveryCompleted { .. } => "delivery-completed",
            FleetEvent::BreakRequired { .. } => "break-required",
            FleetEvent::BreakStarted { .. } => "break-started",
            FleetEvent::BreakEnded { .. } => "break-ended",
            FleetEvent::ShiftStarted { .. } => "shift-started",
            FleetEvent::ShiftEnded { .. } => "shift-ended",
            FleetEvent::LocationUpdated { .. } => "location-updated",
            FleetEvent::DailyReset { .. } => "daily-reset",
            FleetEvent::OrderAssigned { .. } => "order-assigned",
            FleetEvent::BatchCreated { .. } => "batch-created",
            FleetEvent::ReassignmentSucceeded { .. } => "reassignment-succeeded",
            FleetEvent::ReassignmentFailed { .. } => "reassignment-failed",
            FleetEvent::SlaBreach { .. } => "sla-breach",
            FleetEvent::EscalationRequired { .. } => "escalation-required",
            FleetEvent::ErrorTracked { .. } => "error-tracked",
            FleetEvent::Alert { .. } => "alert",
        }
    }
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A send error only means there are currently no
    /// subscribers, which is not a failure of the publishing engine.
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
