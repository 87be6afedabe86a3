// Flight-plan tracker
//
// Keeps at most one active flight plan per (cid, callsign) in the TTL store
// and emits file/update/expire/state_change events as snapshots diff against
// it. Records live under "{cid}-{callsign}-{departure}"; each has a sentinel
// "ttl:{key}" whose firing retires it. A plan arriving with a new departure
// supersedes everything under the identity: the old records expire before
// the new one files.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::airborne::{self, FlightState, REASON_FLIGHT_PLAN_EXPIRED};
use crate::clock::Clock;
use crate::constants::{FLIGHT_PLAN_TTL, TTL_SENTINEL_PREFIX};
use crate::error::Result;
use crate::events::{EventPublisher, StateChange};
use crate::snapshot::{FlightPlan, PilotIdentity, PilotOrPrefile};
use crate::store::TtlStore;

use serde::{Deserialize, Serialize};

/// A flight-plan record as serialized into the TTL store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightPlanRecord {
    pub pilot: PilotIdentity,
    pub flight_plan: FlightPlan,
    pub state: FlightState,
    pub last_state_change: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_altitude: Option<f64>,
    pub timestamp: i64,
}

/// IFR flight-plan lifecycle engine over the TTL store.
pub struct FlightPlanTracker {
    store: Arc<dyn TtlStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl FlightPlanTracker {
    pub fn new(
        store: Arc<dyn TtlStore>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        FlightPlanTracker {
            store,
            publisher,
            clock,
        }
    }

    /// Process one pilot or prefile snapshot record.
    ///
    /// VFR plans and records without a plan are silently dropped. Publish or
    /// store errors propagate so the pipeline withholds the acknowledgement;
    /// reprocessing the same snapshot is idempotent apart from the TTL
    /// refresh.
    pub async fn ingest(&self, snapshot: PilotOrPrefile) -> Result<()> {
        let Some(plan) = snapshot.flight_plan().cloned() else {
            return Ok(());
        };
        if plan.flight_rules() != "I" {
            return Ok(());
        }

        let identity = snapshot.identity();
        let base_key = format!("{}-{}", identity.cid, identity.callsign);
        let departure = plan.departure();

        let keys = self.store.scan(&format!("{base_key}-")).await?;
        let mut matched: Option<(String, FlightPlanRecord)> = None;
        let mut others: Vec<(String, Option<FlightPlanRecord>)> = Vec::new();
        for key in keys {
            let record = match self.store.get(&key).await? {
                Some(raw) => match serde_json::from_str::<FlightPlanRecord>(&raw) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(key, error = %e, "unreadable flight plan record");
                        None
                    }
                },
                None => None,
            };
            match record {
                Some(record)
                    if matched.is_none() && record.flight_plan.departure() == departure =>
                {
                    matched = Some((key, record));
                }
                record => others.push((key, record)),
            }
        }

        match matched {
            Some((key, record)) => self.refresh(&key, record, &plan, &snapshot).await,
            None => {
                self.supersede(others).await?;
                self.file(&base_key, identity, plan, &snapshot).await
            }
        }
    }

    /// Matched-record path: diff the plan, consult the state machine, then
    /// refresh the TTL. Update precedes state_change; both may fire.
    async fn refresh(
        &self,
        key: &str,
        mut record: FlightPlanRecord,
        incoming: &FlightPlan,
        snapshot: &PilotOrPrefile,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        let changed = record.flight_plan.differs(incoming);
        if changed {
            record.flight_plan = incoming.clone();
        }

        let position = snapshot.position();
        let mut state_change: Option<StateChange> = None;
        if let Some(position) = position {
            match airborne::evaluate(record.state, position.groundspeed) {
                Some(transition) if airborne::is_allowed(record.state, transition.to) => {
                    state_change = Some(StateChange {
                        previous: record.state,
                        current: transition.to,
                        reason: transition.reason,
                    });
                    record.state = transition.to;
                    record.last_state_change = now;
                }
                Some(transition) => {
                    debug!(
                        key,
                        from = record.state.as_str(),
                        to = transition.to.as_str(),
                        "dropping disallowed transition"
                    );
                    record.previous_altitude = Some(position.altitude);
                }
                None => {
                    record.previous_altitude = Some(position.altitude);
                }
            }
        }

        record.timestamp = now;
        self.store
            .put(key, &serde_json::to_string(&record)?)
            .await?;

        if changed {
            self.publisher
                .flight_plan_update(&record.pilot, &record.flight_plan)
                .await?;
        }
        if let Some(state) = state_change {
            info!(
                key,
                from = state.previous.as_str(),
                to = state.current.as_str(),
                reason = state.reason,
                "flight state changed"
            );
            self.publisher
                .flight_plan_state_change(&record.pilot, &record.flight_plan, state, position)
                .await?;
        }

        self.refresh_ttl(key).await
    }

    /// Expire and remove every record under the identity prefix. Runs before
    /// a plan with a new departure is filed.
    async fn supersede(
        &self,
        existing: Vec<(String, Option<FlightPlanRecord>)>,
    ) -> Result<()> {
        for (key, record) in existing {
            if let Some(record) = &record {
                self.publisher
                    .flight_plan_expire(&record.pilot, &record.flight_plan)
                    .await?;
                info!(key, "flight plan superseded");
            }
            self.store.delete(&key).await?;
            self.store
                .delete(&format!("{TTL_SENTINEL_PREFIX}{key}"))
                .await?;
        }
        Ok(())
    }

    /// Create a fresh record in `filed` state and emit the file event.
    async fn file(
        &self,
        base_key: &str,
        identity: PilotIdentity,
        plan: FlightPlan,
        snapshot: &PilotOrPrefile,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        let key = format!("{}-{}", base_key, plan.departure());
        let record = FlightPlanRecord {
            pilot: identity,
            flight_plan: plan,
            state: FlightState::Filed,
            last_state_change: now,
            previous_altitude: snapshot.position().map(|p| p.altitude),
            timestamp: now,
        };

        self.store
            .put(&key, &serde_json::to_string(&record)?)
            .await?;
        self.refresh_ttl(&key).await?;
        self.publisher
            .flight_plan_file(&record.pilot, &record.flight_plan)
            .await?;
        info!(key, "flight plan filed");
        Ok(())
    }

    /// Re-arm the record's expiry sentinel, recreating it if it already
    /// fired or was evicted.
    async fn refresh_ttl(&self, key: &str) -> Result<()> {
        let sentinel = format!("{TTL_SENTINEL_PREFIX}{key}");
        if !self.store.arm(&sentinel, FLIGHT_PLAN_TTL).await? {
            self.store.put(&sentinel, "1").await?;
            self.store.arm(&sentinel, FLIGHT_PLAN_TTL).await?;
        }
        Ok(())
    }

    /// Handle a fired expiry sentinel: emit the cancellation state_change
    /// and the expire event, then drop the data key.
    ///
    /// The sentinel expires independently of the data key, so the record is
    /// still readable here. A sentinel whose data is already gone is an
    /// orphan and produces no events.
    pub async fn on_expire(&self, expired_key: &str) -> Result<()> {
        let Some(key) = expired_key.strip_prefix(TTL_SENTINEL_PREFIX) else {
            return Ok(());
        };

        let Some(raw) = self.store.get(key).await? else {
            warn!(key, "expiry fired for a missing record");
            return Ok(());
        };
        let record: FlightPlanRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "unreadable record on expiry, dropping");
                self.store.delete(key).await?;
                return Ok(());
            }
        };

        if airborne::is_allowed(record.state, FlightState::Cancelled) {
            self.publisher
                .flight_plan_state_change(
                    &record.pilot,
                    &record.flight_plan,
                    StateChange {
                        previous: record.state,
                        current: FlightState::Cancelled,
                        reason: REASON_FLIGHT_PLAN_EXPIRED,
                    },
                    None,
                )
                .await?;
        }
        self.publisher
            .flight_plan_expire(&record.pilot, &record.flight_plan)
            .await?;
        self.store.delete(key).await?;
        info!(key, "flight plan expired");
        Ok(())
    }
}
