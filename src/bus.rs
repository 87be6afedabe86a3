//! Message-bus adapter contracts.
//!
//! The engine is handed opaque publication and subscription handles; queue
//! and exchange configuration happens upstream. Consumers acknowledge a
//! delivery only after the engine has finished processing it (including all
//! derived publishes); a rejected or dropped delivery is the broker's cue to
//! redeliver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Error, Result};

/// Inbound routes carrying raw snapshot records.
pub const ROUTE_RAW_CONTROLLERS: &str = "raw.controllers";
pub const ROUTE_RAW_FLIGHT_PLANS: &str = "raw.flight_plans";
pub const ROUTE_RAW_PREFILES: &str = "raw.prefiles";

/// Durable publish with broker-level acknowledgement.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, route: &str, payload: Vec<u8>) -> Result<()>;
}

/// One message handed to a pipeline. Must be settled exactly once: `ack`
/// after successful processing, `reject` to request redelivery. Dropping an
/// unsettled delivery counts as a reject.
pub struct Delivery {
    pub route: String,
    pub payload: Vec<u8>,
    outcome: Option<oneshot::Sender<bool>>,
}

impl Delivery {
    /// A delivery whose settlement can be observed, for tests and adapters
    /// that track redelivery.
    pub fn tracked(route: &str, payload: Vec<u8>) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Delivery {
                route: route.to_string(),
                payload,
                outcome: Some(tx),
            },
            rx,
        )
    }

    pub fn untracked(route: &str, payload: Vec<u8>) -> Self {
        Delivery {
            route: route.to_string(),
            payload,
            outcome: None,
        }
    }

    pub fn ack(mut self) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(true);
        }
    }

    pub fn reject(mut self) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(false);
        }
    }
}

/// Ordered stream of deliveries for one inbound route.
#[async_trait]
pub trait BusConsumer: Send {
    /// Next delivery, or `None` when the subscription is closed.
    async fn next(&mut self) -> Option<Delivery>;
}

/// In-process bus: routes payloads from publishers to per-route consumers.
///
/// Backs the binary's loopback wiring and the tests. Publishes to a route
/// nobody consumes are dropped silently, which is the fire-and-forget shape
/// of a topic exchange with no bound queue.
pub struct MemoryBus {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus {
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a consumer to a route. A later bind for the same route replaces
    /// the earlier one.
    pub fn subscribe(&self, route: &str) -> MemoryConsumer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().unwrap().insert(route.to_string(), tx);
        MemoryConsumer { rx }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, route: &str, payload: Vec<u8>) -> Result<()> {
        let sender = {
            let routes = self.routes.lock().unwrap();
            routes.get(route).cloned()
        };
        match sender {
            Some(tx) => tx
                .send(Delivery::untracked(route, payload))
                .map_err(|_| Error::Publish {
                    route: route.to_string(),
                    reason: "consumer closed".to_string(),
                }),
            None => {
                debug!(route, "publish with no consumer bound");
                Ok(())
            }
        }
    }
}

/// Receiving end of a `MemoryBus` route.
pub struct MemoryConsumer {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// Publisher that retains every published envelope, for asserting on event
/// streams in tests.
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingPublisher {
            published: Mutex::new(Vec::new()),
        })
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl BusPublisher for RecordingPublisher {
    async fn publish(&self, route: &str, payload: Vec<u8>) -> Result<()> {
        let value: Value = serde_json::from_slice(&payload)?;
        self.published
            .lock()
            .unwrap()
            .push((route.to_string(), value));
        Ok(())
    }
}

/// Publisher that fails every publish, for exercising failure paths.
pub struct FailingPublisher;

#[async_trait]
impl BusPublisher for FailingPublisher {
    async fn publish(&self, route: &str, _payload: Vec<u8>) -> Result<()> {
        Err(Error::Publish {
            route: route.to_string(),
            reason: "forced failure".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_consumer() {
        let bus = MemoryBus::new();
        let mut consumer = bus.subscribe("raw.controllers");
        bus.publish("raw.controllers", b"{\"x\":1}".to_vec())
            .await
            .unwrap();

        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.route, "raw.controllers");
        assert_eq!(delivery.payload, b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_publish_without_consumer_is_dropped() {
        let bus = MemoryBus::new();
        assert!(bus.publish("raw.prefiles", b"{}".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delivery_settlement() {
        let (delivery, outcome) = Delivery::tracked("raw.controllers", vec![]);
        delivery.ack();
        assert_eq!(outcome.await.unwrap(), true);

        let (delivery, outcome) = Delivery::tracked("raw.controllers", vec![]);
        delivery.reject();
        assert_eq!(outcome.await.unwrap(), false);

        // A dropped delivery reads as a reject: the sender side goes away
        // without a settlement.
        let (delivery, outcome) = Delivery::tracked("raw.controllers", vec![]);
        drop(delivery);
        assert!(outcome.await.is_err());
    }

    #[tokio::test]
    async fn test_recording_publisher_keeps_order() {
        let publisher = RecordingPublisher::new();
        publisher
            .publish("events.flight_plan.expire", b"{\"event\":\"expire\"}".to_vec())
            .await
            .unwrap();
        publisher
            .publish("events.flight_plan.file", b"{\"event\":\"file\"}".to_vec())
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "events.flight_plan.expire");
        assert_eq!(published[1].0, "events.flight_plan.file");
    }
}
