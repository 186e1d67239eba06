//! Candidate scoring and eligibility for reassignment.

use crate::config::ReassignConfig;
use crate::domain::{Driver, Order};

/// Weighted reassignment score in `[0, 1]`:
///
/// ```text
/// score = 0.4·distance + 0.3·performance + 0.2·load + 0.1·target
/// ```
///
/// - distance: `max(0, 1 − km/50)`
/// - performance: rolling on-time rate (configured fallback without history)
/// - load: `max(0, 1 − current_load/capacity)`
/// - target: `gap_from_target / target_deliveries`
pub fn reassignment_score(driver: &Driver, distance_km: f64, config: &ReassignConfig) -> f64 {
    let distance_score = (1.0 - distance_km / 50.0).max(0.0);
    let performance_score = driver.on_time_rate.unwrap_or(config.default_on_time_rate);
    let load_score = if driver.capacity_kg > 0.0 {
        (1.0 - driver.current_load_kg / driver.capacity_kg).max(0.0)
    } else {
        0.0
    };
    let target_score = if driver.target_deliveries > 0 {
        driver.gap_from_target() as f64 / driver.target_deliveries as f64
    } else {
        0.0
    };

    0.4 * distance_score + 0.3 * performance_score + 0.2 * load_score + 0.1 * target_score
}

/// Hard eligibility filters for a reassignment candidate.
pub fn is_eligible(
    driver: &Driver,
    order: &Order,
    distance_km: f64,
    config: &ReassignConfig,
) -> bool {
    let on_time_rate = driver.on_time_rate.unwrap_or(config.default_on_time_rate);
    on_time_rate >= config.min_on_time_rate
        && driver.hours_worked_today < config.max_hours_worked
        && driver.gap_from_target() > 0
        && driver.residual_capacity_kg() >= order.weight_kg
        && distance_km <= config.max_distance_km
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_driver, make_order};

    #[test]
    fn score_matches_the_weighted_formula() {
        let mut driver = make_driver();
        driver.on_time_rate = Some(0.95);
        driver.current_load_kg = 5.0;
        driver.capacity_kg = 20.0;
        driver.target_deliveries = 10;
        driver.completed_today = 6;
        let config = ReassignConfig::default();

        let score = reassignment_score(&driver, 10.0, &config);
        // 0.4·0.8 + 0.3·0.95 + 0.2·0.75 + 0.1·0.4 = 0.795
        assert!((score - 0.795).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn missing_history_falls_back_to_the_default_rate() {
        let mut driver = make_driver();
        driver.on_time_rate = None;
        let config = ReassignConfig::default();
        let with_default = reassignment_score(&driver, 0.0, &config);
        driver.on_time_rate = Some(config.default_on_time_rate);
        assert_eq!(reassignment_score(&driver, 0.0, &config), with_default);
    }

    #[test]
    fn eligibility_filters_apply() {
        let config = ReassignConfig::default();
        let order = make_order();

        let mut good = make_driver();
        good.on_time_rate = Some(0.95);
        good.hours_worked_today = 6.0;
        good.target_deliveries = 10;
        good.completed_today = 4;
        assert!(is_eligible(&good, &order, 5.0, &config));

        let mut slow = good.clone();
        slow.on_time_rate = Some(0.85);
        assert!(!is_eligible(&slow, &order, 5.0, &config));

        let mut tired = good.clone();
        tired.hours_worked_today = 10.5;
        assert!(!is_eligible(&tired, &order, 5.0, &config));

        let mut done = good.clone();
        done.completed_today = 10;
        assert!(!is_eligible(&done, &order, 5.0, &config));

        let mut full = good.clone();
        full.current_load_kg = full.capacity_kg;
        assert!(!is_eligible(&full, &order, 5.0, &config));

        assert!(!is_eligible(&good, &order, 25.0, &config));
    }
}
