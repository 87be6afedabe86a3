// Pipeline event loops
//
// One logical loop per pipeline. Messages are processed one at a time in
// delivery order so per-identity event ordering holds; the controller sweep
// timer and the flight-plan expiry subscription tick inside their pipeline's
// loop. Acknowledgements happen only after processing, derived publishes
// included: a failed message is rejected and the bus redelivers it.

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::{BusConsumer, Delivery};
use crate::constants::CONTROLLER_SWEEP_INTERVAL;
use crate::controllers::ControllerTracker;
use crate::flightplans::FlightPlanTracker;
use crate::snapshot::{Controller, Pilot, PilotOrPrefile, Prefile, RawEnvelope};

/// Event loop around the controller tracker: snapshot stream plus the
/// periodic inactivity sweep.
pub struct ControllerPipeline {
    tracker: ControllerTracker,
    consumer: Box<dyn BusConsumer>,
    shutdown: watch::Receiver<bool>,
}

impl ControllerPipeline {
    pub fn new(
        tracker: ControllerTracker,
        consumer: Box<dyn BusConsumer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ControllerPipeline {
            tracker,
            consumer,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(CONTROLLER_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                delivery = self.consumer.next() => {
                    match delivery {
                        Some(delivery) => self.handle(delivery).await,
                        None => {
                            info!("controller stream closed");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.tracker.sweep().await;
                }
                _ = self.shutdown.changed() => {
                    info!("controller pipeline stopping");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, delivery: Delivery) {
        let envelope: RawEnvelope<Controller> = match serde_json::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "dropping malformed controller snapshot");
                delivery.ack();
                return;
            }
        };
        match self.tracker.observe(envelope.data, envelope.batch_id).await {
            Ok(()) => delivery.ack(),
            Err(e) => {
                warn!(error = %e, "controller snapshot failed, leaving for redelivery");
                delivery.reject();
            }
        }
    }
}

/// Event loop around the flight-plan tracker: pilot and prefile streams plus
/// the TTL store's expiry subscription.
pub struct FlightPlanPipeline {
    tracker: FlightPlanTracker,
    pilots: Box<dyn BusConsumer>,
    prefiles: Box<dyn BusConsumer>,
    expiries: broadcast::Receiver<String>,
    shutdown: watch::Receiver<bool>,
}

impl FlightPlanPipeline {
    pub fn new(
        tracker: FlightPlanTracker,
        pilots: Box<dyn BusConsumer>,
        prefiles: Box<dyn BusConsumer>,
        expiries: broadcast::Receiver<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        FlightPlanPipeline {
            tracker,
            pilots,
            prefiles,
            expiries,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                delivery = self.pilots.next() => {
                    match delivery {
                        Some(delivery) => self.handle_pilot(delivery).await,
                        None => {
                            info!("pilot stream closed");
                            break;
                        }
                    }
                }
                delivery = self.prefiles.next() => {
                    match delivery {
                        Some(delivery) => self.handle_prefile(delivery).await,
                        None => {
                            info!("prefile stream closed");
                            break;
                        }
                    }
                }
                expired = self.expiries.recv() => {
                    match expired {
                        Ok(key) => {
                            if let Err(e) = self.tracker.on_expire(&key).await {
                                warn!(key, error = %e, "expiry handling failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "expiry subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("expiry subscription closed");
                            break;
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    info!("flight plan pipeline stopping");
                    break;
                }
            }
        }
    }

    async fn handle_pilot(&mut self, delivery: Delivery) {
        let envelope: RawEnvelope<Pilot> = match serde_json::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "dropping malformed pilot snapshot");
                delivery.ack();
                return;
            }
        };
        self.ingest(PilotOrPrefile::Pilot(envelope.data), delivery)
            .await;
    }

    async fn handle_prefile(&mut self, delivery: Delivery) {
        let envelope: RawEnvelope<Prefile> = match serde_json::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "dropping malformed prefile snapshot");
                delivery.ack();
                return;
            }
        };
        self.ingest(PilotOrPrefile::Prefile(envelope.data), delivery)
            .await;
    }

    async fn ingest(&mut self, snapshot: PilotOrPrefile, delivery: Delivery) {
        match self.tracker.ingest(snapshot).await {
            Ok(()) => delivery.ack(),
            Err(e) => {
                warn!(error = %e, "flight plan snapshot failed, leaving for redelivery");
                delivery.reject();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusPublisher, MemoryBus, RecordingPublisher, ROUTE_RAW_CONTROLLERS,
        ROUTE_RAW_FLIGHT_PLANS, ROUTE_RAW_PREFILES};
    use crate::clock::ManualClock;
    use crate::events::EventPublisher;
    use crate::store::{MemoryTtlStore, TtlStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn controller_payload(cid: u64, callsign: &str, batch: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "data": { "cid": cid, "callsign": callsign },
            "batchId": batch
        }))
        .unwrap()
    }

    fn pilot_payload(groundspeed: f64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "data": {
                "cid": 1,
                "callsign": "BAW1",
                "flight_plan": { "flight_rules": "I", "departure": "EGLL", "arrival": "KJFK" },
                "latitude": 51.5,
                "longitude": -0.1,
                "altitude": 50.0,
                "groundspeed": groundspeed,
                "heading": 270.0
            }
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_pipeline_end_to_end() {
        let inbound = MemoryBus::new();
        let consumer = inbound.subscribe(ROUTE_RAW_CONTROLLERS);
        let outbound = RecordingPublisher::new();
        let clock = Arc::new(ManualClock::new(0));
        let publisher = EventPublisher::new(outbound.clone(), clock.clone());
        let tracker = ControllerTracker::new(publisher, clock.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = ControllerPipeline::new(tracker, Box::new(consumer), shutdown_rx);
        let handle = tokio::spawn(pipeline.run());

        for batch in ["a", "b"] {
            inbound
                .publish(ROUTE_RAW_CONTROLLERS, controller_payload(1, "EGLL_TWR", batch))
                .await
                .unwrap();
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let published = outbound.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "events.controller.connect");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flight_plan_pipeline_expiry_flow() {
        let inbound = MemoryBus::new();
        let pilots = inbound.subscribe(ROUTE_RAW_FLIGHT_PLANS);
        let prefiles = inbound.subscribe(ROUTE_RAW_PREFILES);
        let outbound = RecordingPublisher::new();
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryTtlStore::new());
        let publisher = EventPublisher::new(outbound.clone(), clock.clone());
        let tracker = FlightPlanTracker::new(store.clone(), publisher, clock.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = FlightPlanPipeline::new(
            tracker,
            Box::new(pilots),
            Box::new(prefiles),
            store.subscribe_expiries(),
            shutdown_rx,
        );
        let handle = tokio::spawn(pipeline.run());

        inbound
            .publish(ROUTE_RAW_FLIGHT_PLANS, pilot_payload(5.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(outbound.published().len(), 1);
        assert_eq!(outbound.published()[0].0, "events.flight_plan.file");
        outbound.clear();

        // Let the full TTL elapse; the pipeline consumes the sentinel firing
        // and retires the record.
        tokio::time::sleep(Duration::from_secs(700)).await;
        let routes: Vec<_> = outbound
            .published()
            .iter()
            .map(|(route, _)| route.clone())
            .collect();
        assert_eq!(
            routes,
            vec![
                "events.flight_plan.state_change",
                "events.flight_plan.expire"
            ]
        );
        assert!(store.get("1-BAW1-EGLL").await.unwrap().is_none());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_snapshot_acked_and_dropped() {
        let inbound = MemoryBus::new();
        let consumer = inbound.subscribe(ROUTE_RAW_CONTROLLERS);
        let outbound = RecordingPublisher::new();
        let clock = Arc::new(ManualClock::new(0));
        let tracker =
            ControllerTracker::new(EventPublisher::new(outbound.clone(), clock.clone()), clock);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = ControllerPipeline::new(tracker, Box::new(consumer), shutdown_rx);
        let handle = tokio::spawn(pipeline.run());

        inbound
            .publish(ROUTE_RAW_CONTROLLERS, b"{not json".to_vec())
            .await
            .unwrap();
        inbound
            .publish(
                ROUTE_RAW_CONTROLLERS,
                serde_json::to_vec(&json!({ "data": { "callsign": "no-cid" } })).unwrap(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(outbound.published().is_empty());
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
