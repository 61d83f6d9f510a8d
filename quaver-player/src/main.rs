//! quaver-player - daemon entry point
//!
//! Wires the pieces together: cache, resolver, downloader, snapshot
//! store, the session actor, and the control socket. Runs until SIGINT
//! or SIGTERM, then asks the session for an orderly shutdown so the
//! snapshot records a clean exit.

use anyhow::{Context, Result};
use clap::Parser;
use quaver_common::config::{runtime_dir, resolve_data_dir, BootstrapConfig};
use quaver_common::events::EventBus;
use quaver_player::cache::AudioCache;
use quaver_player::control::ControlServer;
use quaver_player::download::Downloader;
use quaver_player::player::EngineConfig;
use quaver_player::resolver::{CachedResolver, YtDlpResolver};
use quaver_player::session::{Session, SessionConfig, SessionHandle};
use quaver_player::snapshot::SnapshotStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for quaver-player
#[derive(Parser, Debug)]
#[command(name = "quaver-player")]
#[command(about = "Playback daemon for remote-catalog audio")]
#[command(version)]
struct Args {
    /// Data directory (cache, snapshot, index database)
    #[arg(short, long, env = "QUAVER_DATA_DIR")]
    data_dir: Option<String>,

    /// Config file path (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path override
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quaver_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BootstrapConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BootstrapConfig::load().context("loading config")?,
    };

    let data_dir = resolve_data_dir(args.data_dir.as_deref(), &config);
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    info!("data dir: {}", data_dir.display());

    let run_dir = runtime_dir(&data_dir);
    let socket_path = args
        .socket
        .or_else(|| config.socket_path.clone())
        .unwrap_or_else(|| run_dir.join("control.sock"));
    let engine_socket = run_dir.join("engine.sock");

    let cache = Arc::new(
        AudioCache::open(&data_dir.join("audio"), config.cache_budget_bytes)
            .await
            .context("opening audio cache")?,
    );
    let downloader = Arc::new(Downloader::new(Arc::clone(&cache)).context("http client")?);
    let resolver = Arc::new(CachedResolver::new(YtDlpResolver::new(
        config.resolver_binary.clone(),
    )));
    let snapshots = SnapshotStore::new(data_dir.join("session.json"));
    let bus = Arc::new(EventBus::default());

    let session_config = SessionConfig {
        engine: EngineConfig {
            binary: config.engine_binary.clone(),
            socket_path: engine_socket,
            gapless: config.gapless,
        },
        quality: config.quality,
    };

    let (session, handle, command_rx) = Session::new(
        session_config,
        resolver,
        cache,
        downloader,
        snapshots,
        bus,
    )
    .context("initializing session")?;

    let session_task = tokio::spawn(session.run(command_rx));

    let server = ControlServer::bind(&socket_path, handle.clone())
        .context("binding control socket")?;
    let server_task = tokio::spawn(server.run());

    shutdown_signal().await;
    info!("shutting down");
    server_task.abort();
    orderly_shutdown(&handle).await;
    let _ = session_task.await;

    // Remove the socket so the next start does not see it as stale
    let _ = std::fs::remove_file(&socket_path);
    info!("shutdown complete");
    Ok(())
}

async fn orderly_shutdown(handle: &SessionHandle) {
    if let Err(e) = handle.shutdown().await {
        warn!("orderly shutdown failed: {}", e);
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
