//! Inbound snapshot data model.
//!
//! Raw snapshots arrive on the bus as per-record JSON envelopes:
//!
//! - `raw.controllers`: `{ "data": <Controller>, "batchId": <string?> }`
//! - `raw.flight_plans`: `{ "data": <Pilot>, "batchId": <string?> }`
//! - `raw.prefiles`: `{ "data": <Prefile>, "batchId": <string?> }`
//!
//! Payloads are dynamic: only the admission fields (`cid`, `callsign`, and
//! for flight plans `flight_rules`) are validated; everything else is carried
//! opaquely and passed through to emitted events. Upstream sometimes delivers
//! the same plan field as a number and sometimes as a string, so plan fields
//! are kept as raw JSON values and compared stringified.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope wrapping every inbound snapshot record.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope<T> {
    pub data: T,
    #[serde(rename = "batchId", default)]
    pub batch_id: Option<String>,
}

/// A controller currently logged on, as described by one snapshot record.
///
/// Everything beyond the identity pair rides along verbatim (name, frequency,
/// facility, rating, server, visual_range, text_atis, last_updated,
/// logon_time, ...) and is re-emitted unchanged on connect/disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Controller {
    pub cid: u64,
    pub callsign: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// A connected pilot: position report plus the latest filed plan.
#[derive(Debug, Clone, Deserialize)]
pub struct Pilot {
    pub cid: u64,
    pub callsign: String,
    #[serde(default)]
    pub flight_plan: Option<FlightPlan>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub groundspeed: f64,
    pub heading: f64,
}

/// A flight plan filed without an active connection. No position data.
#[derive(Debug, Clone, Deserialize)]
pub struct Prefile {
    pub cid: u64,
    pub callsign: String,
    #[serde(default)]
    pub flight_plan: Option<FlightPlan>,
}

/// Position/velocity block attached to `state_change` events for pilots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub groundspeed: f64,
    pub heading: f64,
}

/// The identity pair carried on every flight-plan event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotIdentity {
    pub cid: u64,
    pub callsign: String,
}

/// Either kind of flight-plan snapshot record.
#[derive(Debug, Clone)]
pub enum PilotOrPrefile {
    Pilot(Pilot),
    Prefile(Prefile),
}

impl PilotOrPrefile {
    pub fn identity(&self) -> PilotIdentity {
        match self {
            PilotOrPrefile::Pilot(p) => PilotIdentity {
                cid: p.cid,
                callsign: p.callsign.clone(),
            },
            PilotOrPrefile::Prefile(p) => PilotIdentity {
                cid: p.cid,
                callsign: p.callsign.clone(),
            },
        }
    }

    pub fn flight_plan(&self) -> Option<&FlightPlan> {
        match self {
            PilotOrPrefile::Pilot(p) => p.flight_plan.as_ref(),
            PilotOrPrefile::Prefile(p) => p.flight_plan.as_ref(),
        }
    }

    /// Position telemetry. `None` for prefiles.
    pub fn position(&self) -> Option<Position> {
        match self {
            PilotOrPrefile::Pilot(p) => Some(Position {
                latitude: p.latitude,
                longitude: p.longitude,
                altitude: p.altitude,
                groundspeed: p.groundspeed,
                heading: p.heading,
            }),
            PilotOrPrefile::Prefile(_) => None,
        }
    }
}

/// The 16-field flight plan body.
///
/// Fields are deliberately untyped: they are diffed and re-emitted, never
/// interpreted, except for `flight_rules` (admission) and `departure`
/// (identity), both read through the stringified accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightPlan {
    #[serde(default)]
    pub flight_rules: Value,
    #[serde(default)]
    pub aircraft: Value,
    #[serde(default)]
    pub aircraft_faa: Value,
    #[serde(default)]
    pub aircraft_short: Value,
    #[serde(default)]
    pub departure: Value,
    #[serde(default)]
    pub arrival: Value,
    #[serde(default)]
    pub alternate: Value,
    #[serde(default)]
    pub cruise_tas: Value,
    #[serde(default)]
    pub altitude: Value,
    #[serde(default)]
    pub deptime: Value,
    #[serde(default)]
    pub enroute_time: Value,
    #[serde(default)]
    pub fuel_time: Value,
    #[serde(default)]
    pub remarks: Value,
    #[serde(default)]
    pub route: Value,
    #[serde(default)]
    pub revision_id: Value,
    #[serde(default)]
    pub assigned_transponder: Value,
}

/// Stringify a raw plan field the way the diff sees it: strings verbatim,
/// null empty, anything else via its JSON rendering (so `"350"` == `350`).
pub fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl FlightPlan {
    pub fn flight_rules(&self) -> String {
        text(&self.flight_rules)
    }

    pub fn departure(&self) -> String {
        text(&self.departure)
    }

    fn fields(&self) -> [&Value; 16] {
        [
            &self.flight_rules,
            &self.aircraft,
            &self.aircraft_faa,
            &self.aircraft_short,
            &self.departure,
            &self.arrival,
            &self.alternate,
            &self.cruise_tas,
            &self.altitude,
            &self.deptime,
            &self.enroute_time,
            &self.fuel_time,
            &self.remarks,
            &self.route,
            &self.revision_id,
            &self.assigned_transponder,
        ]
    }

    /// True when any of the 16 fields differs under stringified comparison.
    pub fn differs(&self, other: &FlightPlan) -> bool {
        self.fields()
            .iter()
            .zip(other.fields().iter())
            .any(|(a, b)| text(a) != text(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_with_batch_id() {
        let env: RawEnvelope<Controller> = serde_json::from_value(json!({
            "data": {
                "cid": 1000001,
                "callsign": "EGLL_TWR",
                "name": "Some Controller",
                "frequency": "118.500",
                "facility": 4,
                "text_atis": ["line one", "line two"]
            },
            "batchId": "batch-7"
        }))
        .unwrap();

        assert_eq!(env.batch_id.as_deref(), Some("batch-7"));
        assert_eq!(env.data.cid, 1000001);
        assert_eq!(env.data.callsign, "EGLL_TWR");
        // Opaque fields survive the round trip.
        assert_eq!(env.data.rest["frequency"], json!("118.500"));
        assert_eq!(env.data.rest["text_atis"], json!(["line one", "line two"]));
    }

    #[test]
    fn test_envelope_without_batch_id() {
        let env: RawEnvelope<Prefile> = serde_json::from_value(json!({
            "data": { "cid": 5, "callsign": "BAW1" }
        }))
        .unwrap();
        assert!(env.batch_id.is_none());
        assert!(env.data.flight_plan.is_none());
    }

    #[test]
    fn test_controller_missing_identity_rejected() {
        let result: Result<Controller, _> = serde_json::from_value(json!({
            "callsign": "EGLL_TWR"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_pilot_position() {
        let pilot: Pilot = serde_json::from_value(json!({
            "cid": 1,
            "callsign": "BAW1",
            "latitude": 51.5,
            "longitude": -0.1,
            "altitude": 50.0,
            "groundspeed": 5.0,
            "heading": 270.0
        }))
        .unwrap();
        let pos = PilotOrPrefile::Pilot(pilot).position().unwrap();
        assert_eq!(pos.latitude, 51.5);
        assert_eq!(pos.groundspeed, 5.0);
    }

    #[test]
    fn test_prefile_has_no_position() {
        let prefile: Prefile = serde_json::from_value(json!({
            "cid": 1,
            "callsign": "BAW1",
            "flight_plan": { "flight_rules": "I", "departure": "EGLL" }
        }))
        .unwrap();
        assert!(PilotOrPrefile::Prefile(prefile).position().is_none());
    }

    #[test]
    fn test_text_stringifies_numbers_like_strings() {
        assert_eq!(text(&json!("FL350")), "FL350");
        assert_eq!(text(&json!(350)), "350");
        assert_eq!(text(&json!(null)), "");
    }

    #[test]
    fn test_plan_diff_ignores_representation() {
        let a: FlightPlan = serde_json::from_value(json!({
            "flight_rules": "I", "departure": "EGLL", "cruise_tas": "450"
        }))
        .unwrap();
        let b: FlightPlan = serde_json::from_value(json!({
            "flight_rules": "I", "departure": "EGLL", "cruise_tas": 450
        }))
        .unwrap();
        assert!(!a.differs(&b));
    }

    #[test]
    fn test_plan_diff_detects_change() {
        let a: FlightPlan = serde_json::from_value(json!({
            "flight_rules": "I", "departure": "EGLL", "route": "DET L6 DVR"
        }))
        .unwrap();
        let b: FlightPlan = serde_json::from_value(json!({
            "flight_rules": "I", "departure": "EGLL", "route": "DET L6 DVR UL9"
        }))
        .unwrap();
        assert!(a.differs(&b));
    }

    #[test]
    fn test_plan_unknown_fields_ignored() {
        // Upstream may grow fields; the 16-field body is what's compared.
        let plan: FlightPlan = serde_json::from_value(json!({
            "flight_rules": "I", "departure": "EGLL", "brand_new_field": true
        }))
        .unwrap();
        assert_eq!(plan.flight_rules(), "I");
    }
}
