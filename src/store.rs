//! TTL store abstraction.
//!
//! The engine uses the expiring key-value store through this narrow
//! capability trait; the store's own wire protocol is someone else's problem.
//! The flight-plan tracker layers a two-key protocol on top: the data key `K`
//! is stored without expiry, and a sentinel `ttl:K` is armed with the TTL.
//! When the sentinel fires, the record under `K` is still readable, which is
//! what makes the expire events self-describing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// Capacity of the expiry fan-out channel. Expiries are rare relative to
/// ingest traffic; lagging this far behind means the consumer is wedged.
const EXPIRY_CHANNEL_CAPACITY: usize = 1024;

/// Narrow contract over an expiring key-value store.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Store a serialized record with no intrinsic expiry. Overwriting a key
    /// discards any expiry previously armed on it.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys beginning with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;

    /// Associate (or re-associate) an expiry with `key`. Returns `false`
    /// when the key does not exist — the caller recovers with `put` + `arm`.
    async fn arm(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Keys whose expiry has fired. Delivery is at-least-once; the receiver
    /// must tolerate keys it no longer knows about.
    fn subscribe_expiries(&self) -> broadcast::Receiver<String>;
}

struct Entry {
    value: String,
    /// Bumped by every `put` and `arm`; a pending expiry timer only fires
    /// if its generation still matches, so re-arming supersedes it.
    generation: u64,
}

/// In-process `TtlStore` backed by tokio timers.
///
/// Used by the loopback wiring in `main` and throughout the tests. External
/// store adapters implement the same trait out of crate.
pub struct MemoryTtlStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    expirations: broadcast::Sender<String>,
    generation: AtomicU64,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        let (expirations, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);
        MemoryTtlStore {
            entries: Arc::new(Mutex::new(HashMap::new())),
            expirations,
            generation: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for MemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let generation = self.next_generation();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                generation,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn arm(&self, key: &str, ttl: Duration) -> Result<bool> {
        let generation = self.next_generation();
        {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(key) {
                Some(entry) => entry.generation = generation,
                None => return Ok(false),
            }
        }

        let key = key.to_string();
        let entries = Arc::clone(&self.entries);
        let expirations = self.expirations.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let fired = {
                let mut entries = entries.lock().unwrap();
                match entries.get(&key) {
                    Some(entry) if entry.generation == generation => {
                        entries.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if fired {
                let _ = expirations.send(key);
            }
        });
        Ok(true)
    }

    fn subscribe_expiries(&self) -> broadcast::Receiver<String> {
        self.expirations.subscribe()
    }
}
