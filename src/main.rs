//! # Order Dispatch
//!
//! Drains order events from RabbitMQ into MongoDB, crashing on purpose at the configured
//! `DISPATCH_ERROR_PERCENT`.
//!
//! See [`order_dispatch::config`] for the environment variables.

use order_dispatch::broker::amqp::AmqpBroker;
use order_dispatch::config::DispatchConfig;
use order_dispatch::fatal::ExitProcess;
use order_dispatch::lifecycle::{setup_tracing, wait_for_shutdown_signal, DispatchSystem};
use order_dispatch::store::{connect_with_retry, MongoStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = DispatchConfig::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        amqp_host = %config.amqp_host,
        mongo_host = %config.mongo_host,
        error_percent = config.error_percent,
        "Starting order dispatch"
    );

    let rng = match config.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mongo_uri = config.mongo_uri();
    let store_retry_delay = config.store_retry_delay;
    let store_bootstrap = async move {
        let client = connect_with_retry(&mongo_uri, store_retry_delay).await;
        MongoStore::new(&client)
    };

    let system = DispatchSystem::start(
        &config,
        AmqpBroker::new(config.amqp_uri()),
        store_bootstrap,
        rng,
        Arc::new(ExitProcess),
    );

    info!("Waiting for messages");
    wait_for_shutdown_signal()
        .await
        .map_err(|e| format!("Failed to install signal handlers: {e}"))?;

    system.shutdown().await.map_err(|e| e.to_string())?;
    info!("Order dispatch stopped");
    Ok(())
}
