//! Configuration for the dispatch core.
//!
//! Plain structs with documented fields and defaults matching production
//! policy. `DispatchConfig::from_env()` overlays the enumerated environment
//! variables on top of the defaults; an unparsable value keeps the default
//! and logs a warning rather than failing startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::domain::ServiceClass;
use crate::spatial::GeoPoint;

/// Smart batching engine knobs.
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Interval between batching cycles.
    pub interval: Duration,
    /// Max link distance between dropoffs within one batch, km.
    pub max_batch_distance_km: f64,
    pub min_orders_per_batch: usize,
    pub max_orders_per_batch: usize,
    /// Max spread between earliest and latest member SLA, minutes.
    pub max_sla_spread_minutes: i64,
    /// Only orders of this class are batched. Express stays on the fast lane.
    pub batchable_class: ServiceClass,
    /// Orders older than this are left to single-order dispatch, minutes.
    pub max_candidate_age_minutes: i64,
    /// Minimum remaining SLA slack for a batching candidate, minutes.
    pub min_deadline_slack_minutes: i64,
    /// Candidate cap per cycle.
    pub max_candidates_per_cycle: i64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(600_000),
            max_batch_distance_km: 3.0,
            min_orders_per_batch: 2,
            max_orders_per_batch: 5,
            max_sla_spread_minutes: 60,
            batchable_class: ServiceClass::Standard,
            max_candidate_age_minutes: 30,
            min_deadline_slack_minutes: 30,
            max_candidates_per_cycle: 50,
        }
    }
}

/// SLA reassignment engine knobs.
#[derive(Debug, Clone)]
pub struct ReassignConfig {
    /// Interval between at-risk scans.
    pub scan_interval: Duration,
    pub max_attempts: u32,
    /// Candidate drivers beyond this distance are ineligible, km.
    pub max_distance_km: f64,
    /// Minimum rolling on-time rate for an eligible candidate.
    pub min_on_time_rate: f64,
    /// Candidates at or above this many worked hours are ineligible.
    pub max_hours_worked: f64,
    /// Fallback on-time rate for drivers without history.
    pub default_on_time_rate: f64,
}

impl Default for ReassignConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            max_attempts: 3,
            max_distance_km: 20.0,
            min_on_time_rate: 0.9,
            max_hours_worked: 10.0,
            default_on_time_rate: 0.85,
        }
    }
}

/// Agent trigger gate knobs.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub global_cooldown: Duration,
    pub per_agent_cooldown: Duration,
    pub global_history: usize,
    pub per_agent_history: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            global_cooldown: Duration::from_millis(60_000),
            per_agent_cooldown: Duration::from_millis(300_000),
            global_history: 100,
            per_agent_history: 10,
        }
    }
}

/// Error monitoring sink thresholds.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Errors per minute over the last 5 minutes before HIGH_ERROR_RATE.
    pub error_rate_threshold: f64,
    /// Critical errors in the last hour before CRITICAL_ERROR_THRESHOLD.
    pub critical_error_threshold: usize,
    /// Trailing errors that must fall within 60 s for CONSECUTIVE_ERRORS.
    pub consecutive_error_threshold: usize,
    pub ring_capacity: usize,
    pub retention: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 10.0,
            critical_error_threshold: 5,
            consecutive_error_threshold: 20,
            ring_capacity: 1000,
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Hybrid route optimizer knobs.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Global CVRP kill switch.
    pub cvrp_enabled: bool,
    /// Delivery count at which CVRP becomes preferable without an explicit
    /// caller preference.
    pub cvrp_auto_threshold: usize,
    /// Minimum deliveries for the enhanced multi-vehicle CVRP mode.
    pub cvrp_min_deliveries: usize,
    /// Health probe timeout.
    pub health_timeout: Duration,
    /// Solver call timeout.
    pub solve_timeout: Duration,
    /// Time budget handed to the solver, seconds.
    pub solver_time_budget_secs: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cvrp_enabled: true,
            cvrp_auto_threshold: 50,
            cvrp_min_deliveries: 10,
            health_timeout: Duration::from_secs(3),
            solve_timeout: Duration::from_secs(30),
            solver_time_budget_secs: 10,
        }
    }
}

/// Driver state engine knobs.
#[derive(Debug, Clone)]
pub struct DriverEngineConfig {
    /// Depot the fleet returns to.
    pub base: GeoPoint,
    /// Beyond this distance from base a finished driver heads back
    /// (RETURNING) instead of waiting in place, km.
    pub return_distance_km: f64,
    /// Default candidate search radius, km.
    pub default_radius_km: f64,
    /// Default minimum rating filter for candidate queries.
    pub min_rating: f64,
}

impl Default for DriverEngineConfig {
    fn default() -> Self {
        Self {
            base: GeoPoint::new(52.5200, 13.4050),
            return_distance_km: 15.0,
            default_radius_km: 10.0,
            min_rating: 0.0,
        }
    }
}

/// Top-level configuration owned by the supervisor and shared with every
/// engine at construction.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batching: BatchingConfig,
    pub reassign: ReassignConfig,
    pub trigger: TriggerConfig,
    pub monitoring: MonitoringConfig,
    pub optimizer: OptimizerConfig,
    pub driver_engine: DriverEngineConfig,
    pub matrix: MatrixConfig,
    /// SLA minutes applied when an order arrives without a class deadline.
    pub default_sla_minutes: i64,
}

/// Matrix cache knobs.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub cache_ttl: Duration,
    /// End-to-end bound on one matrix fetch (cache lookup + router call).
    pub fetch_timeout: Duration,
    /// Assumed speed for the haversine fallback, km/h.
    pub fallback_speed_kmh: f64,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(20),
            fallback_speed_kmh: 30.0,
        }
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, %raw, "unparsable environment override, keeping default");
            None
        }
    }
}

impl DispatchConfig {
    /// Build a configuration from the environment, starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parsed::<u64>("BATCHING_INTERVAL_MS") {
            config.batching.interval = Duration::from_millis(ms);
        }
        if let Some(m) = env_parsed::<f64>("MAX_BATCH_DISTANCE_M") {
            config.batching.max_batch_distance_km = m / 1000.0;
        }
        if let Some(n) = env_parsed::<usize>("MIN_ORDERS_PER_BATCH") {
            config.batching.min_orders_per_batch = n;
        }
        if let Some(n) = env_parsed::<usize>("MAX_ORDERS_PER_BATCH") {
            config.batching.max_orders_per_batch = n;
        }
        if let Some(ms) = env_parsed::<i64>("MAX_BATCH_SLA_SPREAD_MS") {
            config.batching.max_sla_spread_minutes = ms / 60_000;
        }
        if let Some(enabled) = env_parsed::<bool>("CVRP_ENABLED") {
            config.optimizer.cvrp_enabled = enabled;
        }
        if let Some(n) = env_parsed::<usize>("CVRP_MIN_DELIVERIES") {
            config.optimizer.cvrp_min_deliveries = n;
        }
        if let Some(minutes) = env_parsed::<i64>("DEFAULT_SLA_MINUTES") {
            config.default_sla_minutes = minutes;
        }
        if let Some(n) = env_parsed::<u32>("MAX_REASSIGNMENT_ATTEMPTS") {
            config.reassign.max_attempts = n;
        }
        if let Some(km) = env_parsed::<f64>("REASSIGN_MAX_DISTANCE_KM") {
            config.reassign.max_distance_km = km;
        }
        if let Some(ms) = env_parsed::<u64>("GLOBAL_TRIGGER_COOLDOWN_MS") {
            config.trigger.global_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parsed::<u64>("PER_AGENT_TRIGGER_COOLDOWN_MS") {
            config.trigger.per_agent_cooldown = Duration::from_millis(ms);
        }
        if let Some(rate) = env_parsed::<f64>("ERROR_RATE_THRESHOLD") {
            config.monitoring.error_rate_threshold = rate;
        }
        if let Some(n) = env_parsed::<usize>("CRITICAL_ERROR_THRESHOLD") {
            config.monitoring.critical_error_threshold = n;
        }
        if let Some(n) = env_parsed::<usize>("CONSECUTIVE_ERROR_THRESHOLD") {
            config.monitoring.consecutive_error_threshold = n;
        }
        if let Some(secs) = env_parsed::<u64>("MATRIX_CACHE_TTL_S") {
            config.matrix.cache_ttl = Duration::from_secs(secs);
        }

        config
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batching: BatchingConfig::default(),
            reassign: ReassignConfig::default(),
            trigger: TriggerConfig::default(),
            monitoring: MonitoringConfig::default(),
            optimizer: OptimizerConfig::default(),
            driver_engine: DriverEngineConfig::default(),
            matrix: MatrixConfig::default(),
            default_sla_minutes: 120,
        }
    }
}
