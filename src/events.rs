//! Outbound event envelopes and routing.
//!
//! Every event is a self-describing JSON envelope published to a topic route.
//!
//! Controller events:
//! `{ "event": "connect"|"disconnect", "data": <Controller>, "timestamp": <ms> }`
//!
//! Flight-plan events:
//! `{ "event": "file"|"update"|"expire"|"state_change",
//!    "pilot": { "cid", "callsign" }, "flight_plan": <FlightPlan>,
//!    "timestamp": <ms>, "state"?: { "previous", "current", "reason" },
//!    "position"?: { "latitude", "longitude", "altitude", "groundspeed",
//!    "heading" } }`
//!
//! The optional blocks are omitted entirely when absent; `state` and
//! `position` appear on `state_change` (position only when the source record
//! was a pilot, not a prefile).

use std::sync::Arc;

use serde::Serialize;

use crate::airborne::FlightState;
use crate::bus::BusPublisher;
use crate::clock::Clock;
use crate::error::Result;
use crate::snapshot::{Controller, FlightPlan, PilotIdentity, Position};

pub const ROUTE_CONTROLLER_CONNECT: &str = "events.controller.connect";
pub const ROUTE_CONTROLLER_DISCONNECT: &str = "events.controller.disconnect";
pub const ROUTE_FLIGHT_PLAN_FILE: &str = "events.flight_plan.file";
pub const ROUTE_FLIGHT_PLAN_UPDATE: &str = "events.flight_plan.update";
pub const ROUTE_FLIGHT_PLAN_EXPIRE: &str = "events.flight_plan.expire";
pub const ROUTE_FLIGHT_PLAN_STATE_CHANGE: &str = "events.flight_plan.state_change";

/// State block carried on `state_change` events.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub previous: FlightState,
    pub current: FlightState,
    pub reason: &'static str,
}

#[derive(Serialize)]
struct ControllerEnvelope<'a> {
    event: &'static str,
    data: &'a Controller,
    timestamp: i64,
}

#[derive(Serialize)]
struct FlightPlanEnvelope<'a> {
    event: &'static str,
    pilot: &'a PilotIdentity,
    flight_plan: &'a FlightPlan,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<StateChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

/// Serializes typed envelopes and hands them to the bus adapter.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn BusPublisher>,
    clock: Arc<dyn Clock>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn BusPublisher>, clock: Arc<dyn Clock>) -> Self {
        EventPublisher { bus, clock }
    }

    pub async fn controller_connect(&self, controller: &Controller) -> Result<()> {
        self.controller_event(ROUTE_CONTROLLER_CONNECT, "connect", controller)
            .await
    }

    pub async fn controller_disconnect(&self, controller: &Controller) -> Result<()> {
        self.controller_event(ROUTE_CONTROLLER_DISCONNECT, "disconnect", controller)
            .await
    }

    async fn controller_event(
        &self,
        route: &str,
        event: &'static str,
        data: &Controller,
    ) -> Result<()> {
        let envelope = ControllerEnvelope {
            event,
            data,
            timestamp: self.clock.now_millis(),
        };
        self.bus.publish(route, serde_json::to_vec(&envelope)?).await
    }

    pub async fn flight_plan_file(
        &self,
        pilot: &PilotIdentity,
        plan: &FlightPlan,
    ) -> Result<()> {
        self.flight_plan_event(ROUTE_FLIGHT_PLAN_FILE, "file", pilot, plan, None, None)
            .await
    }

    pub async fn flight_plan_update(
        &self,
        pilot: &PilotIdentity,
        plan: &FlightPlan,
    ) -> Result<()> {
        self.flight_plan_event(ROUTE_FLIGHT_PLAN_UPDATE, "update", pilot, plan, None, None)
            .await
    }

    pub async fn flight_plan_expire(
        &self,
        pilot: &PilotIdentity,
        plan: &FlightPlan,
    ) -> Result<()> {
        self.flight_plan_event(ROUTE_FLIGHT_PLAN_EXPIRE, "expire", pilot, plan, None, None)
            .await
    }

    pub async fn flight_plan_state_change(
        &self,
        pilot: &PilotIdentity,
        plan: &FlightPlan,
        state: StateChange,
        position: Option<Position>,
    ) -> Result<()> {
        self.flight_plan_event(
            ROUTE_FLIGHT_PLAN_STATE_CHANGE,
            "state_change",
            pilot,
            plan,
            Some(state),
            position,
        )
        .await
    }

    async fn flight_plan_event(
        &self,
        route: &str,
        event: &'static str,
        pilot: &PilotIdentity,
        flight_plan: &FlightPlan,
        state: Option<StateChange>,
        position: Option<Position>,
    ) -> Result<()> {
        let envelope = FlightPlanEnvelope {
            event,
            pilot,
            flight_plan,
            timestamp: self.clock.now_millis(),
            state,
            position,
        };
        self.bus.publish(route, serde_json::to_vec(&envelope)?).await
    }
}
