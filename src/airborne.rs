// Airborne state machine
//
// Advances a flight through filed -> departing -> enroute -> approaching ->
// arrived from ground-speed telemetry. Altitude thresholds exist alongside
// the speed thresholds but the transition conditions read ground speed only.

use serde::{Deserialize, Serialize};

use crate::constants::{LANDING_SPEED_KTS, TAKEOFF_SPEED_KTS, TAXI_SPEED_KTS};

/// Lifecycle state of a flight plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightState {
    Filed,
    Departing,
    Enroute,
    Approaching,
    Arrived,
    Cancelled,
}

impl FlightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightState::Filed => "filed",
            FlightState::Departing => "departing",
            FlightState::Enroute => "enroute",
            FlightState::Approaching => "approaching",
            FlightState::Arrived => "arrived",
            FlightState::Cancelled => "cancelled",
        }
    }
}

pub const REASON_ALREADY_AIRBORNE: &str = "already_airborne";
pub const REASON_CONNECTED_AT_GATE: &str = "pilot_connected_at_gate";
pub const REASON_ABOVE_TAKEOFF_THRESHOLD: &str = "ground_speed_above_takeoff_threshold";
pub const REASON_ALREADY_LANDED: &str = "already_landed";
pub const REASON_SLOWING_FOR_APPROACH: &str = "slowing_for_approach";
pub const REASON_LANDED_AND_TAXIING: &str = "landed_and_taxiing";
pub const REASON_FLIGHT_PLAN_EXPIRED: &str = "flight_plan_expired";

/// A proposed state transition with its reason tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: FlightState,
    pub reason: &'static str,
}

/// Propose at most one transition for the current ground speed.
///
/// Conditions are evaluated in declaration order; the first match fires.
/// Terminal states never transition.
pub fn evaluate(state: FlightState, groundspeed: f64) -> Option<Transition> {
    let transition = |to, reason| Some(Transition { to, reason });
    match state {
        FlightState::Filed if groundspeed > TAKEOFF_SPEED_KTS => {
            transition(FlightState::Enroute, REASON_ALREADY_AIRBORNE)
        }
        FlightState::Filed if groundspeed < TAXI_SPEED_KTS => {
            transition(FlightState::Departing, REASON_CONNECTED_AT_GATE)
        }
        FlightState::Departing if groundspeed > TAKEOFF_SPEED_KTS => {
            transition(FlightState::Enroute, REASON_ABOVE_TAKEOFF_THRESHOLD)
        }
        FlightState::Enroute if groundspeed < TAXI_SPEED_KTS => {
            transition(FlightState::Arrived, REASON_ALREADY_LANDED)
        }
        FlightState::Enroute if groundspeed < LANDING_SPEED_KTS => {
            transition(FlightState::Approaching, REASON_SLOWING_FOR_APPROACH)
        }
        FlightState::Approaching if groundspeed < TAXI_SPEED_KTS => {
            transition(FlightState::Arrived, REASON_LANDED_AND_TAXIING)
        }
        _ => None,
    }
}

/// The allowed-transition set enforced on every proposed or externally
/// triggered state change. Proposals outside it are dropped.
pub fn is_allowed(from: FlightState, to: FlightState) -> bool {
    use FlightState::*;
    match from {
        Filed => matches!(to, Departing | Enroute | Cancelled),
        Departing => matches!(to, Enroute | Cancelled),
        Enroute => matches!(to, Approaching | Arrived | Cancelled),
        Approaching => matches!(to, Arrived | Cancelled),
        Arrived | Cancelled => false,
    }
}
