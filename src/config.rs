use clap::Parser;

/// Event engine configuration. Every option reads from the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Outbound message bus URL.
    #[arg(long, env = "RABBIT_URL", default_value = "amqp://localhost:5672")]
    pub rabbit_url: String,

    /// Expiring key-value store URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    /// Cadence of the upstream snapshot poller in milliseconds. Observational
    /// only; the engine reacts to whatever arrives.
    #[arg(long, env = "REFRESH_INTERVAL_MS", default_value_t = 15_000)]
    pub refresh_interval_ms: u64,

    /// Logging verbosity (tracing env-filter syntax).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
