// Shared tunables for the diff-and-lifecycle engine

use std::time::Duration;

/// Lifetime of a flight-plan record in the TTL store. Refreshed on every
/// ingest that touches the record.
pub const FLIGHT_PLAN_TTL: Duration = Duration::from_secs(600);

/// A controller unseen for longer than this is considered disconnected.
pub const INACTIVE_CONTROLLER_TIMEOUT_MS: i64 = 60_000;

/// Cadence of the controller inactivity sweep.
pub const CONTROLLER_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Distinct snapshot batches that must be observed before the controller
/// tracker emits connect/disconnect events. The first batches prime the
/// cache without producing noise.
pub const WARMUP_BATCH_THRESHOLD: u64 = 2;

/// Ground speed (knots) below which an aircraft is taxiing.
pub const TAXI_SPEED_KTS: f64 = 30.0;

/// Ground speed (knots) above which an aircraft has taken off.
pub const TAKEOFF_SPEED_KTS: f64 = 60.0;

/// Ground speed (knots) below which an enroute aircraft is slowing to land.
pub const LANDING_SPEED_KTS: f64 = 60.0;

/// Altitude (feet) below which an aircraft is considered on the ground.
pub const GROUND_ALTITUDE_FT: f64 = 100.0;

/// Altitude delta (feet) distinguishing a climb or descent between reports.
pub const CLIMB_DESCEND_DELTA_FT: f64 = 1000.0;

/// Prefix of the expiry sentinel key paired with each flight-plan data key.
pub const TTL_SENTINEL_PREFIX: &str = "ttl:";

/// Bounded wait for in-flight work to drain on shutdown.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);
