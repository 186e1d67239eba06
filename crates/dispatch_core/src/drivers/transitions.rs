//! Driver state machine: the legal transition table.
//!
//! Assignment is legal from AVAILABLE and RETURNING (a returning driver is
//! between jobs and scores lower, not zero). Everything else follows the
//! lifecycle: shift start/end, break start/end, and the post-delivery
//! three-way split.

use crate::domain::{Driver, DriverState};
use crate::error::DispatchError;

fn illegal(from: DriverState, to: DriverState, detail: &str) -> DispatchError {
    DispatchError::IllegalTransition {
        from,
        to,
        detail: detail.to_string(),
    }
}

/// Validate a requested transition against the current driver row.
pub fn validate_transition(driver: &Driver, to: DriverState) -> Result<(), DispatchError> {
    let from = driver.state;
    match (from, to) {
        // shift-start
        (DriverState::Offline, DriverState::Available) => Ok(()),

        // order assignment
        (DriverState::Available | DriverState::Returning, DriverState::Busy) => {
            if driver.has_active_work() {
                Err(illegal(from, to, "driver already carries active work"))
            } else {
                Ok(())
            }
        }

        // post-delivery outcomes
        (DriverState::Busy, DriverState::Available)
        | (DriverState::Busy, DriverState::Returning)
        | (DriverState::Busy, DriverState::OnBreak) => Ok(()),

        // break lifecycle
        (DriverState::Available | DriverState::Returning, DriverState::OnBreak) => Ok(()),
        (DriverState::OnBreak, DriverState::Available) => Ok(()),

        // shift-end
        (DriverState::Available, DriverState::Offline) => {
            if driver.has_active_work() {
                Err(illegal(from, to, "shift end with active work"))
            } else {
                Ok(())
            }
        }

        _ => Err(illegal(from, to, "transition not in the lifecycle table")),
    }
}

/// Where a driver lands after completing a delivery: mandatory break beats
/// the distance check, and a driver far from base heads back instead of
/// idling in place.
pub fn next_state_after_delivery(
    needs_break: bool,
    distance_from_base_km: f64,
    return_distance_km: f64,
) -> DriverState {
    if needs_break {
        DriverState::OnBreak
    } else if distance_from_base_km > return_distance_km {
        DriverState::Returning
    } else {
        DriverState::Available
    }
}
