//! Order ingestion service entry point.

use std::time::Duration;

use bus::{InMemoryBus, JetStreamBus, MessageBus};
use ingest::{IngestError, IngestionController};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore, StorageError};
use server::config::Config;
use server::error::StartupError;
use server::{AppState, publisher};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Recycles pooled connections so server-side restarts are picked up.
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

/// Connects the configured bus, then serves until shutdown.
async fn run<S>(
    config: &Config,
    store: S,
    metrics_handle: PrometheusHandle,
) -> Result<(), StartupError>
where
    S: OrderStore + Clone + 'static,
{
    match &config.nats {
        Some(nats) => {
            let bus = JetStreamBus::connect(nats.clone()).await?;
            serve(config, store, &bus, metrics_handle).await
        }
        None => {
            tracing::warn!("NATS_URL not set, using in-process bus");
            serve(config, store, &InMemoryBus::new(), metrics_handle).await
        }
    }
}

/// Runs ingestion and the HTTP listener until a shutdown signal arrives.
///
/// Intake stops and in-flight messages settle before this returns, so the
/// caller may tear down the store afterwards.
async fn serve<S, B>(
    config: &Config,
    store: S,
    bus: &B,
    metrics_handle: PrometheusHandle,
) -> Result<(), StartupError>
where
    S: OrderStore + Clone + 'static,
    B: MessageBus,
{
    let shutdown = CancellationToken::new();

    let controller = IngestionController::new(store, &config.ingest, shutdown.clone());
    let ingestion = controller.spawn(bus, &config.ingest).await?;

    if let Some(path) = &config.publish_file {
        publisher::publish_file(bus, &config.ingest.channel, path).await?;
    }

    let app = server::create_app(AppState::new(shutdown.clone()), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting HTTP listener");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await
        .map_err(StartupError::Serve)?;

    shutdown.cancel();
    let stats = ingestion.await.map_err(IngestError::from)?;
    tracing::info!(handled = stats.total(), "ingestion drained");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    server::init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    server::routes::metrics::describe();

    // 3. Open the order store and run until shutdown
    if config.database.is_memory() {
        tracing::warn!("using in-memory order store, orders are lost on exit");
        run(&config, InMemoryOrderStore::new(), metrics_handle).await?;
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(config.database.acquire_timeout)
            .max_lifetime(MAX_CONNECTION_LIFETIME)
            .connect(&config.database.url)
            .await
            .map_err(StorageError::from)?;
        let store = PostgresOrderStore::new(pool.clone());
        store.run_migrations().await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "connected to PostgreSQL"
        );

        run(&config, store, metrics_handle).await?;

        // 4. Connections go last, after intake stopped and workers drained
        pool.close().await;
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
