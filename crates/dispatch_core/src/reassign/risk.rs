//! SLA risk classification for in-flight orders.

use chrono::{DateTime, Duration, Utc};

use crate::domain::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaRisk {
    Healthy,
    Warning,
    Critical,
    Breached,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskAssessment {
    pub risk: SlaRisk,
    pub minutes_to_deadline: f64,
    /// Whether the current delivery estimate lands inside the SLA.
    pub can_meet_sla: bool,
}

impl RiskAssessment {
    /// Only warning/critical orders that cannot meet their SLA are
    /// reassignment candidates; breached orders escalate instead.
    pub fn needs_reassignment(&self) -> bool {
        matches!(self.risk, SlaRisk::Warning | SlaRisk::Critical) && !self.can_meet_sla
    }
}

/// Classify an in-flight order given its estimated delivery time.
///
/// - breached: the deadline already passed
/// - critical: ≤ 15 min to deadline and the estimate misses it
/// - warning: ≤ 30 min to deadline and the estimate lands within 5 min of
///   it (or past it)
/// - healthy: everything else
pub fn assess(
    order: &Order,
    estimated_delivery: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RiskAssessment {
    let minutes_to_deadline = order.minutes_to_deadline(now);
    let can_meet_sla = estimated_delivery <= order.sla_deadline;

    let risk = if minutes_to_deadline < 0.0 {
        SlaRisk::Breached
    } else if minutes_to_deadline <= 15.0 && !can_meet_sla {
        SlaRisk::Critical
    } else if minutes_to_deadline <= 30.0
        && estimated_delivery >= order.sla_deadline - Duration::minutes(5)
    {
        SlaRisk::Warning
    } else {
        SlaRisk::Healthy
    };

    RiskAssessment {
        risk,
        minutes_to_deadline,
        can_meet_sla,
    }
}
