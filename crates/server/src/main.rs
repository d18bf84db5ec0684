//! Chainview server binary.
//!
//! Startup sequence: load configuration, open the header store, replay
//! persisted headers (`Loading`), run the one-shot bootstrap and
//! catch-up sync (`Syncing`), start the gossip ingress (`Running`), and
//! serve the `/v2` query surface until a shutdown signal arrives.

use anyhow::{Context, Result};
use chainview_core::{
    config::AppConfig,
    p2p,
    store::HeaderStore,
    sync::Synchronizer,
    tracker::ChainTracker,
    ChainManager,
};
use server::router::{self, AppState};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,chainview_core={level},server={level}",
            level = config.logging.level
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("configuration load failed: {e}"))?;
    init_logging(&config);

    info!(
        network = %config.network,
        port = config.port,
        storage_path = %config.storage_path.display(),
        bootstrap_url = config.bootstrap_url.as_deref().unwrap_or("-"),
        "starting chainview-server"
    );

    // Pre-Running failures (storage permissions, bad config) exit
    // non-zero through the error return.
    let store = HeaderStore::new(&config.storage_path, &config.network, config.headers_per_file)
        .context("failed to open header store")?;
    let manager = ChainManager::with_store(config.network.clone(), store);

    let loader = Arc::clone(&manager);
    let loaded = tokio::task::spawn_blocking(move || loader.load())
        .await
        .context("store load task failed")?
        .context("failed to load persisted headers")?;
    if let Some(tip) = manager.get_tip() {
        info!(loaded, height = tip.height, tip = %tip.hash, "chain loaded from store");
    } else {
        info!("no persisted chain, starting empty");
    }

    let synchronizer = Synchronizer::new().context("failed to build synchronizer")?;
    synchronizer
        .run(
            &manager,
            config.bootstrap_url.as_deref(),
            config.sync_url.as_deref(),
        )
        .await;

    // The gossip transport is wired through this channel; the core only
    // consumes the message stream and the peer list.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (announcements_tx, announcements_rx) = p2p::announcement_channel();
    if let Some(peers_path) = &config.bootstrap_peers {
        match p2p::load_bootstrap_peers(peers_path, &config.network) {
            Ok(peers) => info!(count = peers.len(), "bootstrap peers loaded"),
            Err(err) => warn!(error = %err, "failed to load bootstrap peers"),
        }
    }
    let ingress = p2p::spawn_ingress(Arc::clone(&manager), announcements_rx, shutdown_rx)
        .context("failed to start p2p ingress")?;

    let app = router::create_router(AppState {
        tracker: Arc::clone(&manager) as Arc<dyn ChainTracker>,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    drop(announcements_tx);
    if let Err(err) = ingress.await {
        error!(error = %err, "p2p ingress task failed");
    }

    // Flush any complete spans accumulated since the last checkpoint.
    let flusher = Arc::clone(&manager);
    match tokio::task::spawn_blocking(move || flusher.checkpoint()).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!(error = %err, "final checkpoint failed"),
        Err(err) => warn!(error = %err, "final checkpoint task failed"),
    }

    info!("server stopped");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
