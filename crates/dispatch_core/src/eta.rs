//! Dynamic ETA model and time-window feasibility.
//!
//! The estimate is a deterministic product of a base travel time and
//! multiplicative condition factors, in the same shape as a time-of-day
//! speed profile: base minutes from distance and vehicle speed, then
//! traffic and weather multipliers, then a flat penalty when the driver is
//! still heading back to base. Unknown condition values are total and map
//! to factor 1.0.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DriverState, VehicleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrafficCondition {
    Light,
    #[default]
    Normal,
    Medium,
    Heavy,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    Sunny,
    #[default]
    Normal,
    Rainy,
    Stormy,
    #[serde(other)]
    Unknown,
}

/// Policy table for the ETA model. Factors for adverse conditions are
/// ≥ 1.0; benign and unknown conditions are exactly 1.0.
#[derive(Debug, Clone)]
pub struct EtaPolicy {
    pub bicycle_speed_kmh: f64,
    pub motorcycle_speed_kmh: f64,
    pub car_speed_kmh: f64,
    pub van_speed_kmh: f64,
    pub medium_traffic_factor: f64,
    pub heavy_traffic_factor: f64,
    pub rainy_factor: f64,
    pub stormy_factor: f64,
    /// Flat minutes added while the driver is RETURNING.
    pub returning_penalty_minutes: f64,
    /// Slack boundary between TIGHT and ON_TIME, minutes.
    pub tight_slack_minutes: f64,
}

impl Default for EtaPolicy {
    fn default() -> Self {
        Self {
            bicycle_speed_kmh: 15.0,
            motorcycle_speed_kmh: 40.0,
            car_speed_kmh: 35.0,
            van_speed_kmh: 30.0,
            medium_traffic_factor: 1.3,
            heavy_traffic_factor: 1.6,
            rainy_factor: 1.25,
            stormy_factor: 1.5,
            returning_penalty_minutes: 5.0,
            tight_slack_minutes: 10.0,
        }
    }
}

impl EtaPolicy {
    pub fn base_speed_kmh(&self, vehicle: VehicleType) -> f64 {
        match vehicle {
            VehicleType::Bicycle => self.bicycle_speed_kmh,
            VehicleType::Motorcycle => self.motorcycle_speed_kmh,
            VehicleType::Car => self.car_speed_kmh,
            VehicleType::Van => self.van_speed_kmh,
        }
    }

    pub fn traffic_factor(&self, traffic: TrafficCondition) -> f64 {
        match traffic {
            TrafficCondition::Medium => self.medium_traffic_factor,
            TrafficCondition::Heavy => self.heavy_traffic_factor,
            TrafficCondition::Light | TrafficCondition::Normal | TrafficCondition::Unknown => 1.0,
        }
    }

    pub fn weather_factor(&self, weather: WeatherCondition) -> f64 {
        match weather {
            WeatherCondition::Rainy => self.rainy_factor,
            WeatherCondition::Stormy => self.stormy_factor,
            WeatherCondition::Sunny | WeatherCondition::Normal | WeatherCondition::Unknown => 1.0,
        }
    }
}

/// Inputs to a driver-to-pickup estimate.
#[derive(Debug, Clone, Copy)]
pub struct EtaRequest {
    pub distance_km: f64,
    pub vehicle_type: VehicleType,
    pub traffic: TrafficCondition,
    pub weather: WeatherCondition,
    pub driver_state: DriverState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaEstimate {
    pub total_minutes: f64,
    pub arrival_time: DateTime<Utc>,
}

/// Deterministic driver-to-pickup travel estimate.
pub fn driver_to_pickup_eta(policy: &EtaPolicy, request: EtaRequest, now: DateTime<Utc>) -> EtaEstimate {
    let base_minutes = request.distance_km / policy.base_speed_kmh(request.vehicle_type) * 60.0;
    let mut total_minutes = base_minutes
        * policy.traffic_factor(request.traffic)
        * policy.weather_factor(request.weather);
    if request.driver_state == DriverState::Returning {
        total_minutes += policy.returning_penalty_minutes;
    }
    EtaEstimate {
        total_minutes,
        arrival_time: now + Duration::seconds((total_minutes * 60.0).round() as i64),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindowFeasibility {
    OnTime,
    Tight,
    Infeasible,
}

/// A delivery time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindowCheck {
    pub feasibility: TimeWindowFeasibility,
    /// `latest − (now + travel)`, minutes. Negative when infeasible.
    pub slack_minutes: f64,
}

/// Classify whether `travel_minutes` from `now` lands inside the window.
///
/// TIGHT iff `0 ≤ slack < tight_slack_minutes`; ON_TIME iff
/// `slack ≥ tight_slack_minutes`; INFEASIBLE iff `slack < 0`.
pub fn check_time_window(
    policy: &EtaPolicy,
    now: DateTime<Utc>,
    window: TimeWindow,
    travel_minutes: f64,
) -> TimeWindowCheck {
    let arrival = now + Duration::seconds((travel_minutes * 60.0).round() as i64);
    let slack_minutes = (window.latest - arrival).num_seconds() as f64 / 60.0;
    let feasibility = if slack_minutes < 0.0 {
        TimeWindowFeasibility::Infeasible
    } else if slack_minutes < policy.tight_slack_minutes {
        TimeWindowFeasibility::Tight
    } else {
        TimeWindowFeasibility::OnTime
    };
    TimeWindowCheck {
        feasibility,
        slack_minutes,
    }
}
