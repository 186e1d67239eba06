//! Availability scoring and unavailability diagnostics.

use crate::domain::{Driver, DriverState};
use crate::eta::{TimeWindowCheck, TimeWindowFeasibility};

/// Why a driver cannot take work right now, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailabilityReason {
    Inactive,
    NotAvailable(DriverState),
    MaxHoursReached,
    BreakRequired,
    DailyTargetMet,
}

impl UnavailabilityReason {
    pub fn label(&self) -> &'static str {
        match self {
            UnavailabilityReason::Inactive => "inactive",
            UnavailabilityReason::NotAvailable(_) => "not_available",
            UnavailabilityReason::MaxHoursReached => "max_hours_reached",
            UnavailabilityReason::BreakRequired => "break_required",
            UnavailabilityReason::DailyTargetMet => "daily_target_met",
        }
    }
}

/// First matching unavailability reason, or `None` when the driver can be
/// offered work. RETURNING counts as assignable; it only scores lower.
pub fn unavailability_reason(driver: &Driver) -> Option<UnavailabilityReason> {
    if !driver.active {
        return Some(UnavailabilityReason::Inactive);
    }
    if !matches!(
        driver.state,
        DriverState::Available | DriverState::Returning
    ) {
        return Some(UnavailabilityReason::NotAvailable(driver.state));
    }
    if driver.hours_worked_today >= driver.max_hours_per_day {
        return Some(UnavailabilityReason::MaxHoursReached);
    }
    if driver.requires_break_after > 0
        && driver.consecutive_deliveries >= driver.requires_break_after
    {
        return Some(UnavailabilityReason::BreakRequired);
    }
    if driver.gap_from_target() == 0 {
        return Some(UnavailabilityReason::DailyTargetMet);
    }
    None
}

/// Additive availability score for order assignment, clamped to ≥ 0 and
/// rounded to two decimals.
///
/// - state: +40 AVAILABLE, +20 RETURNING, 0 otherwise
/// - distance: `max(0, 30·(1 − km/10))`
/// - rating: `(rating/5)·15`
/// - target gap: `min(15, gap·2)`
/// - time window (when supplied): +20 ON_TIME with ≥ 10 min slack,
///   +15 ON_TIME below that, +10 TIGHT, −50 INFEASIBLE
pub fn availability_score(
    driver: &Driver,
    distance_km: f64,
    window: Option<&TimeWindowCheck>,
) -> f64 {
    let state_points = match driver.state {
        DriverState::Available => 40.0,
        DriverState::Returning => 20.0,
        _ => 0.0,
    };
    let distance_points = (30.0 * (1.0 - distance_km / 10.0)).max(0.0);
    let rating_points = (driver.rating / 5.0) * 15.0;
    let gap_points = (driver.gap_from_target() as f64 * 2.0).min(15.0);
    let window_points = window.map_or(0.0, |check| match check.feasibility {
        TimeWindowFeasibility::OnTime if check.slack_minutes >= 10.0 => 20.0,
        TimeWindowFeasibility::OnTime => 15.0,
        TimeWindowFeasibility::Tight => 10.0,
        TimeWindowFeasibility::Infeasible => -50.0,
    });

    let total = state_points + distance_points + rating_points + gap_points + window_points;
    (total.max(0.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_driver;

    #[test]
    fn score_adds_the_four_base_components() {
        let mut driver = make_driver();
        driver.state = DriverState::Available;
        driver.rating = 5.0;
        driver.target_deliveries = 12;
        driver.completed_today = 10;
        // 40 (state) + 15 (5 km) + 15 (rating) + 4 (gap 2) = 74
        assert_eq!(availability_score(&driver, 5.0, None), 74.0);
    }

    #[test]
    fn returning_scores_twenty_for_state() {
        let mut driver = make_driver();
        driver.state = DriverState::Returning;
        driver.rating = 0.0;
        driver.target_deliveries = 0;
        driver.completed_today = 0;
        // 20 (state) + 30 (0 km) = 50
        assert_eq!(availability_score(&driver, 0.0, None), 50.0);
    }

    #[test]
    fn distance_component_floors_at_zero() {
        let mut driver = make_driver();
        driver.state = DriverState::Available;
        driver.rating = 0.0;
        driver.target_deliveries = 0;
        // 40 + 0 (12 km is past the 10 km falloff) = 40
        assert_eq!(availability_score(&driver, 12.0, None), 40.0);
    }

    #[test]
    fn gap_component_caps_at_fifteen() {
        let mut driver = make_driver();
        driver.state = DriverState::Available;
        driver.rating = 0.0;
        driver.target_deliveries = 30;
        driver.completed_today = 0;
        // 40 + 30 (0 km) + 0 + 15 (capped) = 85
        assert_eq!(availability_score(&driver, 0.0, None), 85.0);
    }

    #[test]
    fn infeasible_window_penalty_clamps_to_zero() {
        let mut driver = make_driver();
        driver.state = DriverState::Returning;
        driver.rating = 0.0;
        driver.target_deliveries = 0;
        let window = TimeWindowCheck {
            feasibility: TimeWindowFeasibility::Infeasible,
            slack_minutes: -12.0,
        };
        // 20 + 0 (10 km) + 0 + 0 - 50 = -30 → clamped to 0
        assert_eq!(availability_score(&driver, 10.0, Some(&window)), 0.0);
    }

    #[test]
    fn window_bonus_tiers() {
        let mut driver = make_driver();
        driver.state = DriverState::Available;
        driver.rating = 0.0;
        driver.target_deliveries = 0;
        let base = availability_score(&driver, 10.0, None);

        let on_time = TimeWindowCheck {
            feasibility: TimeWindowFeasibility::OnTime,
            slack_minutes: 25.0,
        };
        let tight = TimeWindowCheck {
            feasibility: TimeWindowFeasibility::Tight,
            slack_minutes: 4.0,
        };
        assert_eq!(availability_score(&driver, 10.0, Some(&on_time)), base + 20.0);
        assert_eq!(availability_score(&driver, 10.0, Some(&tight)), base + 10.0);
    }

    #[test]
    fn unavailability_priority_order() {
        let mut driver = make_driver();
        driver.active = false;
        driver.state = DriverState::Busy;
        assert_eq!(
            unavailability_reason(&driver),
            Some(UnavailabilityReason::Inactive)
        );

        driver.active = true;
        assert_eq!(
            unavailability_reason(&driver),
            Some(UnavailabilityReason::NotAvailable(DriverState::Busy))
        );

        driver.state = DriverState::Available;
        driver.hours_worked_today = 11.0;
        assert_eq!(
            unavailability_reason(&driver),
            Some(UnavailabilityReason::MaxHoursReached)
        );

        driver.hours_worked_today = 4.0;
        driver.requires_break_after = 5;
        driver.consecutive_deliveries = 5;
        assert_eq!(
            unavailability_reason(&driver),
            Some(UnavailabilityReason::BreakRequired)
        );

        driver.consecutive_deliveries = 0;
        driver.target_deliveries = 10;
        driver.completed_today = 10;
        assert_eq!(
            unavailability_reason(&driver),
            Some(UnavailabilityReason::DailyTargetMet)
        );

        driver.completed_today = 3;
        assert_eq!(unavailability_reason(&driver), None);
    }

    #[test]
    fn returning_driver_is_not_flagged_unavailable() {
        let mut driver = make_driver();
        driver.state = DriverState::Returning;
        assert_eq!(unavailability_reason(&driver), None);
    }
}
