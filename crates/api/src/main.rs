//! API server entry point.

use api::config::{Config, LogFormat};
use cart_store::{CartStore, InMemoryCartStore, PostgresCartStore};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reconciler::{ExpirationSweeper, SweeperConfig};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

/// Serves the API over `store` until a shutdown signal, then stops the
/// sweeper after its in-flight sweep completes.
async fn serve<S: CartStore>(
    config: &Config,
    store: S,
    backend: &'static str,
    metrics_handle: PrometheusHandle,
) -> std::io::Result<()> {
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let state = api::create_state(store, backend);
    let sweeper = ExpirationSweeper::new(
        state.engine.clone(),
        SweeperConfig {
            interval: config.sweep_interval,
            ttl: config.cart_ttl,
        },
    )
    .spawn();

    let app = api::create_app(state, metrics_handle);
    tracing::info!(%addr, backend, "starting API server");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.shutdown().await;
    served
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    api::routes::metrics::describe();

    // 3. Pick the store backend and serve
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let store = PostgresCartStore::new(pool).with_lock_timeout(config.lock_timeout);
            store.run_migrations().await?;
            tracing::info!("database migrations applied");

            serve(&config, store, "postgres", metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, carts and stock are kept in memory");
            let store = InMemoryCartStore::new().with_lock_timeout(config.lock_timeout);
            for &(book_id, stock) in &config.seed_books {
                store.set_stock(book_id, stock).await;
            }
            if config.seed_books.is_empty() {
                tracing::warn!(
                    "SEED_BOOKS not set, in-memory catalog is empty and every cart will be rejected"
                );
            } else {
                tracing::info!(books = config.seed_books.len(), "in-memory catalog seeded");
            }

            serve(&config, store, "memory", metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
