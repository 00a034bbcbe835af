//! sesh-server - durable signed-session demo server
//!
//! Loads the session configuration and the persisted secret ring, then
//! serves the transfer endpoint and the parity page over one shared
//! session manager. Startup is fail-closed: a missing or unreadable ring
//! file aborts instead of minting an ephemeral secret, because an
//! ephemeral secret would silently invalidate every outstanding session
//! on the next restart.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sesh_core::keyring::SecretKeyRing;
use sesh_core::store::{MemoryStore, SessionStore, StorageMode};
use sesh_core::time::{Clock, SystemClock};
use sesh_core::SessionConfig;
use sesh_server::{build_router, SessionManager};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sesh-server", about = "Durable signed-session demo server")]
struct Args {
    /// Path to the session configuration file.
    #[arg(long, default_value = "sesh.toml")]
    config: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8003")]
    listen: SocketAddr,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Generate a fresh secret ring at the configured path and exit.
    /// Refuses to overwrite an existing ring.
    #[arg(long)]
    init_ring: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SessionConfig::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    if args.init_ring {
        anyhow::ensure!(
            !config.secret_source.exists(),
            "a secret ring already exists at {}",
            config.secret_source.display()
        );
        SecretKeyRing::generate()
            .persist(&config.secret_source)
            .with_context(|| {
                format!("failed to persist new ring to {}", config.secret_source.display())
            })?;
        info!(path = %config.secret_source.display(), "generated secret ring");
        return Ok(());
    }

    let ring = SecretKeyRing::load(&config.secret_source).with_context(|| {
        format!(
            "failed to load secret ring from {}; generate and persist one \
             before serving (sessions signed by an unpersisted secret do \
             not survive restarts)",
            config.secret_source.display()
        )
    })?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new(
        config.storage,
        config.idle_expiry_secs(),
        Arc::clone(&clock),
    ));
    let manager = Arc::new(SessionManager::new(Arc::clone(&store), ring, &config, clock));
    let root = config.application_root();

    // Expired records read as absent but still occupy memory until swept.
    let reaper_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            match reaper_store.evict_expired().await {
                Ok(0) => {},
                Ok(count) => debug!(count, "evicted expired sessions"),
                Err(err) => warn!(error = %err, "session eviction sweep failed"),
            }
        }
    });

    info!(
        listen = %args.listen,
        mode = ?config.storage,
        cookie = %config.cookie_name,
        "starting session server"
    );
    if config.storage == StorageMode::ServerSide {
        info!("server-side records do not survive process restarts");
    }

    let router = build_router(manager, root);
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    axum::serve(listener, router)
        .await
        .context("server terminated")?;
    Ok(())
}
