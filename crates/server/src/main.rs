mod api;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use viewrelay_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore, Collaborators,
    ConfiguredAccountPool, DisabledAutomation, Dispatcher, FulfillmentOrchestrator,
    KeyValueStore, OrderQueue, OrderStore, SqliteAuditStore, SqliteKvStore, SqliteOrderQueue,
    SqliteOrderStore, UnconfiguredTrafficRouter, UrlMetadataProvider,
};

use api::create_router;
use state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// How often expired dedup locks and cached clip results are purged.
const KV_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("VIEWRELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let mut config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Only the disabled automation backend ships with the binary.
    if config.fulfillment.clip_enabled {
        warn!("No browser automation backend available, clip creation disabled");
        config.fulfillment.clip_enabled = false;
    }

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let db_path = &config.database.path;
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(db_path).context("Failed to create audit store")?,
    );
    let order_store: Arc<dyn OrderStore> = Arc::new(
        SqliteOrderStore::new(db_path).context("Failed to create order store")?,
    );
    let kv_store = Arc::new(SqliteKvStore::new(db_path).context("Failed to create kv store")?);
    let queue: Arc<dyn OrderQueue> = Arc::new(
        SqliteOrderQueue::new(db_path, config.dispatch.lease())
            .context("Failed to create order queue")?,
    );
    info!("Stores initialized");

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let accounts = ConfiguredAccountPool::new(config.automation.accounts.clone());
    if accounts.is_empty() {
        info!("No automation accounts configured");
    }

    let orchestrator = FulfillmentOrchestrator::new(
        &config,
        Collaborators {
            orders: Arc::clone(&order_store),
            kv: Arc::clone(&kv_store) as Arc<dyn KeyValueStore>,
            metadata: Arc::new(UrlMetadataProvider),
            automation: Arc::new(DisabledAutomation),
            accounts: Arc::new(accounts),
            router: Arc::new(UnconfiguredTrafficRouter),
        },
    )
    .with_audit(audit_handle.clone());

    let dispatcher = Arc::new(
        Dispatcher::new(queue, Arc::new(orchestrator), config.dispatch.clone())
            .with_audit(audit_handle.clone()),
    );
    dispatcher.start().await;
    info!(
        "Dispatcher started with {} workers, automation pool capacity {}",
        config.dispatch.workers, config.automation.pool_capacity
    );

    let purge_handle = tokio::spawn(purge_expired_keys(kv_store));

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&dispatcher),
        order_store,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping dispatcher...");
    dispatcher.stop().await;
    purge_handle.abort();
    info!("Dispatcher stopped");

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone. The orchestrator
    // and dispatcher hold clones, so they go first.
    drop(dispatcher);
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

async fn purge_expired_keys(kv_store: Arc<SqliteKvStore>) {
    let mut interval = tokio::time::interval(KV_PURGE_INTERVAL);
    loop {
        interval.tick().await;
        match kv_store.purge_expired().await {
            Ok(removed) => debug!("Purged {} expired kv entries", removed),
            Err(e) => warn!("Failed to purge expired kv entries: {}", e),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
