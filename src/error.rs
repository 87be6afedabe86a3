// Crate-wide error type

use thiserror::Error;

/// All errors surfaced by the engine.
///
/// Per-message errors never take a pipeline down: the ingest loops log them
/// and withhold the acknowledgement so the bus redelivers. Only
/// initialization failures are fatal (exit code 1 in `main`).
#[derive(Error, Debug)]
pub enum Error {
    /// An outbound publish was not acknowledged by the bus.
    #[error("publish to '{route}' failed: {reason}")]
    Publish { route: String, reason: String },

    /// The TTL store rejected or failed an operation.
    #[error("ttl store error: {0}")]
    Store(String),

    /// A payload or stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Publish {
            route: "events.controller.connect".to_string(),
            reason: "broker unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "publish to 'events.controller.connect' failed: broker unreachable"
        );

        let err = Error::Store("connection reset".to_string());
        assert_eq!(err.to_string(), "ttl store error: connection reset");
    }

    #[test]
    fn test_serde_error_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serde(_)));
    }
}
