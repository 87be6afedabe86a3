// Controller tracker
//
// Maintains the set of online controllers from periodic snapshots and emits
// connect on first sight, disconnect on inactivity. The first snapshot after
// a cold start would make every controller look new, so events are held back
// until two distinct batches have primed the cache.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::constants::{
    INACTIVE_CONTROLLER_TIMEOUT_MS, WARMUP_BATCH_THRESHOLD,
};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::snapshot::Controller;

struct ControllerEntry {
    /// Verbatim snapshot at first sight; re-emitted on disconnect.
    snapshot: Controller,
    last_seen: i64,
    /// Whether a connect event has been published. Stays false when the
    /// first sighting falls inside the warm-up window, so the connect fires
    /// on the next observation instead.
    announced: bool,
}

/// Tracks online controllers and their last-seen times.
///
/// Owned by the controller pipeline; `observe` and `sweep` run on the same
/// logical event loop, so no internal locking is needed.
pub struct ControllerTracker {
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    online: HashMap<(u64, String), ControllerEntry>,
    batches_observed: u64,
    last_batch_id: Option<String>,
}

impl ControllerTracker {
    pub fn new(publisher: EventPublisher, clock: Arc<dyn Clock>) -> Self {
        ControllerTracker {
            publisher,
            clock,
            online: HashMap::new(),
            batches_observed: 0,
            last_batch_id: None,
        }
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    fn warmed_up(&self) -> bool {
        self.batches_observed >= WARMUP_BATCH_THRESHOLD
    }

    /// Process one controller snapshot record.
    ///
    /// A publish failure propagates so the pipeline withholds the
    /// acknowledgement; the cache keeps the record but not the announced
    /// mark, and the connect is retried on the next batch.
    pub async fn observe(
        &mut self,
        controller: Controller,
        batch_id: Option<String>,
    ) -> Result<()> {
        if let Some(id) = batch_id {
            if self.last_batch_id.as_deref() != Some(id.as_str()) {
                self.batches_observed += 1;
                self.last_batch_id = Some(id);
                debug!(batches_observed = self.batches_observed, "new snapshot batch");
            }
        }

        let now = self.clock.now_millis();
        let key = (controller.cid, controller.callsign.clone());
        let entry = self
            .online
            .entry(key.clone())
            .or_insert_with(|| ControllerEntry {
                snapshot: controller.clone(),
                last_seen: now,
                announced: false,
            });
        entry.last_seen = now;
        let announced = entry.announced;

        if self.warmed_up() && !announced {
            self.publisher.controller_connect(&controller).await?;
            if let Some(entry) = self.online.get_mut(&key) {
                entry.announced = true;
            }
            info!(cid = key.0, callsign = %key.1, "controller connected");
        }
        Ok(())
    }

    /// Remove controllers unseen past the inactivity timeout, emitting a
    /// disconnect for each. Best-effort: a failed publish keeps the record
    /// so the next tick retries it. Skipped entirely during warm-up.
    pub async fn sweep(&mut self) {
        if !self.warmed_up() {
            return;
        }

        let now = self.clock.now_millis();
        let stale: Vec<(u64, String)> = self
            .online
            .iter()
            .filter(|(_, entry)| now - entry.last_seen > INACTIVE_CONTROLLER_TIMEOUT_MS)
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            let Some(entry) = self.online.get(&key) else {
                continue;
            };
            match self.publisher.controller_disconnect(&entry.snapshot).await {
                Ok(()) => {
                    self.online.remove(&key);
                    info!(cid = key.0, callsign = %key.1, "controller disconnected");
                }
                Err(e) => {
                    warn!(
                        cid = key.0,
                        callsign = %key.1,
                        error = %e,
                        "disconnect publish failed, retrying next sweep"
                    );
                }
            }
        }
    }
}
