// Traffic events - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use traffic_events::bus::{
    MemoryBus, ROUTE_RAW_CONTROLLERS, ROUTE_RAW_FLIGHT_PLANS, ROUTE_RAW_PREFILES,
};
use traffic_events::clock::{Clock, SystemClock};
use traffic_events::config::Config;
use traffic_events::constants::SHUTDOWN_DRAIN;
use traffic_events::controllers::ControllerTracker;
use traffic_events::events::EventPublisher;
use traffic_events::flightplans::FlightPlanTracker;
use traffic_events::ingest::{ControllerPipeline, FlightPlanPipeline};
use traffic_events::store::{MemoryTtlStore, TtlStore};

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_logging(&config.log_level);

    info!("Starting traffic events engine");

    if let Err(e) = run(config).await {
        error!("Unrecoverable initialization failure: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        rabbit_url = %config.rabbit_url,
        redis_url = %config.redis_url,
        refresh_interval_ms = config.refresh_interval_ms,
        "External endpoints configured"
    );

    // In-process bus and store; broker-backed adapters bind to the same
    // traits out of crate.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryTtlStore::new());
    let bus = Arc::new(MemoryBus::new());
    let publisher = EventPublisher::new(bus.clone(), clock.clone());

    let controllers = bus.subscribe(ROUTE_RAW_CONTROLLERS);
    let pilots = bus.subscribe(ROUTE_RAW_FLIGHT_PLANS);
    let prefiles = bus.subscribe(ROUTE_RAW_PREFILES);
    let expiries = store.subscribe_expiries();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller_pipeline = ControllerPipeline::new(
        ControllerTracker::new(publisher.clone(), clock.clone()),
        Box::new(controllers),
        shutdown_rx.clone(),
    );
    let flight_plan_pipeline = FlightPlanPipeline::new(
        FlightPlanTracker::new(store.clone(), publisher, clock),
        Box::new(pilots),
        Box::new(prefiles),
        expiries,
        shutdown_rx,
    );

    let controller_handle = tokio::spawn(controller_pipeline.run());
    let flight_plan_handle = tokio::spawn(flight_plan_pipeline.run());

    info!(
        routes = %format!(
            "{}, {}, {}",
            ROUTE_RAW_CONTROLLERS, ROUTE_RAW_FLIGHT_PLANS, ROUTE_RAW_PREFILES
        ),
        "Pipelines running"
    );

    signal::ctrl_c().await?;
    info!("Received shutdown signal (Ctrl+C)");

    // Stop accepting, drain in-flight work up to the bounded wait.
    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
        let _ = controller_handle.await;
        let _ = flight_plan_handle.await;
    })
    .await;
    if drained.is_err() {
        error!(
            "Pipelines did not drain within {:?}, exiting anyway",
            SHUTDOWN_DRAIN
        );
    }

    info!("Stopped");
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}
