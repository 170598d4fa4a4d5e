//! Transfer Coordinator
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ HTTP API │───▶│ TransferStore│◀──▶│ Dispatcher×N │───▶│ Counterparty │
//! │ (axum)   │    │ (PG / memory)│    │ (lease + CAS)│    │ / Data plane │
//! └──────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! Usage: `transfer_coordinator [--env dev] [--port 8080]`

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use transfer_coordinator::config::AppConfig;
use transfer_coordinator::db::Database;
use transfer_coordinator::logging::init_logging;
use transfer_coordinator::transfer::gateway::{HttpDataPlane, HttpProtocolGateway, NoopDataPlane};
use transfer_coordinator::transfer::{
    BroadcastPublisher, DataPlane, Dispatcher, InMemoryTransferStore, LeaseManager,
    PgTransferStore, RetryScheduler, StateMachine, TransferCoordinator, TransferStore, router,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn build_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn TransferStore>, Arc<dyn LeaseManager>)> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.health_check().await.context("PostgreSQL health check failed")?;
            let store = Arc::new(PgTransferStore::new(db.pool().clone()));
            store.migrate().await.context("Schema migration failed")?;
            info!("Using PostgreSQL transfer store");
            Ok((store.clone(), store))
        }
        None => {
            warn!("No postgres_url configured - using in-memory store (state is lost on exit)");
            let store = Arc::new(InMemoryTransferStore::new());
            Ok((store.clone(), store))
        }
    }
}

fn build_data_plane(config: &AppConfig) -> anyhow::Result<Arc<dyn DataPlane>> {
    match &config.protocol.data_plane_url {
        Some(url) => {
            info!(url = %url, "Using HTTP data plane");
            Ok(Arc::new(HttpDataPlane::new(
                url.clone(),
                config.protocol.timeout(),
            )?))
        }
        None => {
            warn!("No data_plane_url configured - data-plane calls are no-ops");
            Ok(Arc::new(NoopDataPlane))
        }
    }
}

/// Log every committed transition
fn spawn_event_logger(publisher: &BroadcastPublisher) -> tokio::task::JoinHandle<()> {
    let mut rx = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    process_id = %event.process_id,
                    transfer_type = %event.transfer_type,
                    from = %event.previous_state,
                    to = %event.new_state,
                    version = event.version,
                    error_detail = ?event.error_detail,
                    "Transfer event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    info!(node_id = %config.node_id, "Starting transfer coordinator in {} mode", env);

    let (store, leases) = build_store(&config).await?;
    let coordinator = Arc::new(TransferCoordinator::new(store.clone()));

    let gateway = Arc::new(HttpProtocolGateway::new(&config.protocol)?);
    let machine = Arc::new(StateMachine::new(gateway, build_data_plane(&config)?));

    let publisher = Arc::new(BroadcastPublisher::new(config.events.capacity));
    let event_logger = spawn_event_logger(&publisher);

    // Dispatchers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::with_capacity(config.dispatcher.workers);
    for _ in 0..config.dispatcher.workers.max(1) {
        let dispatcher = Dispatcher::new(
            store.clone(),
            leases.clone(),
            machine.clone(),
            RetryScheduler::new(config.retry.clone()),
        )
        .with_worker_id(format!("{}-{}", config.node_id, uuid::Uuid::new_v4()))
        .with_publisher(publisher.clone())
        .with_lease_ttl(config.lease.ttl())
        .with_config(config.dispatcher.clone());

        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { dispatcher.run(shutdown).await }));
    }

    // HTTP API
    let port = get_port_override().unwrap_or(config.api.port);
    let addr: SocketAddr = format!("{}:{}", config.api.host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.api.host, port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Transfer API listening on {}", addr);

    let served = axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Dispatcher task failed: {}", e);
        }
    }
    drop(publisher);
    event_logger.abort();

    served.context("HTTP server error")?;
    info!("Transfer coordinator stopped");
    Ok(())
}
