//! Outbox relay worker entry point.

use std::sync::Arc;

use domain::{InMemorySupplierDirectory, StateMachineEngine};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay::{
    HandlerDispatcher, IdempotentConsumer, LogFormat, OutboxRelay, ProcessedEventPurger,
    RejectLosingQuotes, RelayConfig,
};
use sqlx::postgres::PgPoolOptions;
use store::PostgresStore;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration and tracing
    let config = RelayConfig::from_env();
    init_tracing(&config);

    // 2. Prometheus exporter with its own listener
    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()?;

    // 3. Database and schema
    let pool = PgPoolOptions::new()
        .max_connections((config.workers as u32 + 2).max(5))
        .connect(config.database_url()?)
        .await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await?;
    let store = Arc::new(store);

    // 4. Handlers behind an idempotent dispatcher
    let engine = Arc::new(StateMachineEngine::new(
        store.as_ref().clone(),
        Arc::new(InMemorySupplierDirectory::new()),
    ));
    let consumer = IdempotentConsumer::new(Arc::clone(&store), config.processed_event_ttl());
    let dispatcher = HandlerDispatcher::new(consumer).with_handler(Arc::new(RejectLosingQuotes::new(engine)));
    let sink = Arc::new(dispatcher);

    // 5. Workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    for n in 0..config.workers {
        let worker_id = format!("relay-{}-{n}", uuid::Uuid::new_v4());
        let relay = OutboxRelay::from_config(Arc::clone(&store), sink.clone(), worker_id, &config);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { relay.run(shutdown).await }));
    }
    let purger = ProcessedEventPurger::new(Arc::clone(&store), config.purge_interval);
    let shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { purger.run(shutdown).await }));

    tracing::info!(
        workers = config.workers,
        batch_size = config.batch_size,
        metrics_addr = %config.metrics_addr,
        "outbox relay started"
    );

    // 6. Graceful shutdown: stop claiming, let in-flight batches finish
    shutdown_signal().await;
    shutdown_tx.send(true)?;
    for task in tasks {
        if let Err(err) = task.await {
            tracing::error!(error = %err, "worker task panicked");
        }
    }

    tracing::info!("outbox relay shut down gracefully");
    Ok(())
}
