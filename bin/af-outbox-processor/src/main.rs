//! Autoflow Outbox Processor
//!
//! Drains the outbox table on a fixed tick, republishes each row to a Redis
//! stream named after its topic, and notifies the owning task when a message
//! is dropped after repeated failures.
//!
//! ## Configuration
//!
//! An optional TOML file is read from `AF_CONFIG_PATH`. Environment overrides:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `AF_DISPATCH_INTERVAL_SECS` | `30` | Tick interval in seconds |
//! | `AF_DISPATCH_BATCH_SIZE` | `1000` | Max rows per tick |
//! | `AF_DISPATCH_MAX_ATTEMPTS` | `5` | Failures tolerated before a message is dropped |
//! | `AF_NOTIFY_HOST` | `localhost` | Host of the task callback API |
//! | `AF_NOTIFY_PORT` | `8082` | Port of the task callback API |
//! | `AF_STORE_KIND` | `mongo` | Outbox store: `postgres` or `mongo` |
//! | `AF_STORE_URL` | - | Store connection URL (required) |
//! | `AF_BUS_REDIS_URL` | `redis://127.0.0.1:6379` | Redis URL for the message bus |
//! | `AF_LOG_JSON` | `false` | Emit JSON log lines |
//! | `AF_METRICS_ENABLED` | `true` | Serve `/health`, `/ready` and `/metrics` |
//! | `AF_METRICS_PORT` | `9090` | Port of the health and metrics server |
//! | `RUST_LOG` | `info` | Log level |

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use af_config::{AppConfig, StoreKind, StoreSettings};
use af_outbox::{
    DispatcherConfig, HttpClientConfig, OutboxDispatcher, OutboxStore, RedisMessageBus,
    ReqwestHttpClient, RestartPolicy, TaskNotifier,
};

use sqlx::postgres::PgPoolOptions;

mod server;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Autoflow Outbox Processor");
    match &config.source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No {} set, using defaults and environment", af_config::CONFIG_PATH_ENV),
    }

    let store = create_outbox_store(&config.store).await?;
    info!("Outbox store initialized ({:?})", config.store.kind);

    let bus = Arc::new(RedisMessageBus::connect(&config.bus.redis_url).await?);

    let http_client = ReqwestHttpClient::new(HttpClientConfig {
        request_timeout: config.notifier.timeout(),
        ..HttpClientConfig::default()
    })?;
    let per_second = NonZeroU32::new(config.dispatcher.notify_per_second)
        .ok_or_else(|| anyhow::anyhow!("dispatcher.notify_per_second must be > 0"))?;
    let notifier = Arc::new(TaskNotifier::new(
        Arc::new(http_client),
        config.notifier.base_url(),
        config.notifier.path.clone(),
        per_second,
    ));
    info!("Task callbacks go to {}{}", config.notifier.base_url(), config.notifier.path);

    let dispatcher = OutboxDispatcher::new(
        store,
        bus,
        notifier,
        DispatcherConfig {
            tick_interval: config.dispatcher.tick_interval(),
            batch_size: config.dispatcher.batch_size,
            max_attempts: config.dispatcher.max_attempts,
            backoff_base: config.dispatcher.backoff_base(),
        },
        RestartPolicy {
            cooldown: config.dispatcher.panic_cooldown(),
            max_consecutive_restarts: config.dispatcher.max_consecutive_restarts,
            ..RestartPolicy::default()
        },
    );

    let shutdown = CancellationToken::new();

    let server_handle = if config.server.enabled {
        let state = server::HealthState {
            dispatcher: dispatcher.state(),
            stats: dispatcher.stats(),
        };
        let port = config.server.metrics_port;
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server::serve(port, state, token).await {
                error!("Metrics server failed: {}", e);
            }
        }))
    } else {
        None
    };

    let dispatcher_handle = dispatcher.start_push_message(shutdown.clone());

    info!("Autoflow Outbox Processor started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    shutdown.cancel();

    match tokio::time::timeout(Duration::from_secs(30), dispatcher_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Outbox dispatcher task failed: {}", e),
        Err(_) => warn!("Outbox dispatcher did not stop within 30s"),
    }

    if let Some(handle) = server_handle {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Metrics server task failed: {}", e),
            Err(_) => warn!("Metrics server did not stop within 5s"),
        }
    }

    info!("Autoflow Outbox Processor shutdown complete");
    Ok(())
}

async fn create_outbox_store(settings: &StoreSettings) -> Result<Arc<dyn OutboxStore>> {
    if settings.url.is_empty() {
        anyhow::bail!("store.url (AF_STORE_URL) is required");
    }

    match settings.kind {
        StoreKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&settings.url)
                .await?;
            let store = af_outbox::postgres::PostgresOutboxStore::new(pool, settings.postgres_table.clone())?;
            store.init_schema().await?;
            info!("Using PostgreSQL outbox table {}", settings.postgres_table);
            Ok(Arc::new(store))
        }
        StoreKind::Mongo => {
            let client = mongodb::Client::with_uri_str(&settings.url).await?;
            let store = af_outbox::mongo::MongoOutboxStore::new(
                client,
                &settings.mongo_database,
                &settings.mongo_collection,
            );
            store.init_indexes().await?;
            info!("Using MongoDB outbox: {}/{}", settings.mongo_database, settings.mongo_collection);
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
