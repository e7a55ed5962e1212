// WireGuard one-time bootstrap daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wg_bootstrap::{
    config::{load_config, Args},
    gate::BootstrapGate,
    handshake::WgHandshakes,
    keepalive::HttpKeepAlive,
    monitor::{ActivityMonitor, MonitorExit},
    qr::PngQrEncoder,
    server,
    store::{read_marker, FsStore},
    types::{Config, KeepAliveConfig},
};

/// Poll interval of the startup watcher for the peer config
const CONFIG_WATCH_INTERVAL_SECS: u64 = 1;

/// Upper bound on draining background tasks at shutdown
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Log once the peer config appears, or warn if it never does
fn spawn_config_watcher(store: FsStore, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let path = store.peer_config_path().display().to_string();
        if store
            .wait_for_peer_config(timeout, Duration::from_secs(CONFIG_WATCH_INTERVAL_SECS))
            .await
        {
            log::info!("Peer config available at {}", path);
        } else {
            log::warn!("Peer config {} not found after {:?}", path, timeout);
        }
    })
}

/// Start the keep-alive loop in the background
fn spawn_monitor(keepalive: &KeepAliveConfig, cancel: CancellationToken) -> Result<JoinHandle<()>> {
    let source = WgHandshakes::new(keepalive.wg_interface.clone(), keepalive.backend)
        .context("Failed to create handshake source")?;
    log::debug!("keepalive: polling handshakes on {}", source.interface());
    let pinger = HttpKeepAlive::new(keepalive.url.clone(), keepalive.timing.ping_timeout)?;
    let monitor = ActivityMonitor::new(source, pinger, keepalive.timing);

    Ok(tokio::spawn(async move {
        match monitor.run(cancel).await {
            MonitorExit::Stopped(reason) => {
                log::info!("keepalive: loop finished ({:?}), machine may now suspend", reason)
            }
            MonitorExit::Cancelled => log::debug!("keepalive: loop cancelled"),
        }
    }))
}

/// Resolve on SIGTERM or SIGINT
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to set up SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to set up SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => log::info!("Received SIGTERM"),
        _ = sigint.recv() => log::info!("Received SIGINT"),
    }
    Ok(())
}

fn log_startup(config: &Config, store: &FsStore) {
    log::info!("Starting wg-bootstrap");
    log::info!("Peer config: {}", store.peer_config_path().display());

    match read_marker(store.marker_path()) {
        Ok(Some(at)) => log::info!("Bootstrap already completed at {}, /bootstrap is disabled", at),
        Ok(None) => log::info!("Bootstrap pending"),
        Err(e) => log::warn!("Bootstrap marker present but unreadable: {:#}", e),
    }

    match &config.endpoint {
        Some(target) => log::info!("Endpoint rewrite: {}", target),
        None => log::info!("Endpoint rewrite: disabled (no public host), IPv6 fixup only"),
    }

    if config.token.is_some() {
        log::info!("Bootstrap token required");
    }

    match &config.keepalive {
        Some(keepalive) => log::info!(
            "Keep-alive enabled: {} (interface {}, backend {:?})",
            keepalive.url,
            keepalive.wg_interface,
            keepalive.backend
        ),
        None => log::info!("Keep-alive disabled"),
    }
}

fn main() -> Result<()> {
    // 2 threads is sufficient: HTTP handlers plus the keep-alive loop
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("wg-bootstrap")
        .enable_time()
        .enable_io()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = load_config(&args).context("Invalid configuration")?;

    let store = FsStore::new(config.peer_config_path(), config.marker_path());
    log_startup(&config, &store);

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(spawn_config_watcher(store.clone(), config.config_wait));

    if let Some(keepalive) = &config.keepalive {
        tasks.push(spawn_monitor(keepalive, cancel.clone())?);
    }

    let gate = Arc::new(BootstrapGate::new(
        Arc::new(store),
        Arc::new(PngQrEncoder::default()),
        config.token.clone(),
        config.endpoint.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server_cancel = cancel.clone();
    let mut server_handle =
        tokio::spawn(async move { server::serve(gate, addr, server_cancel).await });

    tokio::select! {
        result = shutdown_signal() => result?,
        result = &mut server_handle => {
            // The server only returns on its own when binding or serving failed
            cancel.cancel();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.context("HTTP server failed")),
                Err(e) => Err(anyhow::anyhow!("HTTP server task panicked: {}", e)),
            };
        }
    }

    log::info!("Shutting down...");
    cancel.cancel();

    let drain = async {
        let _ = server_handle.await;
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), drain)
        .await
        .is_err()
    {
        log::warn!("Shutdown timed out after {}s", SHUTDOWN_TIMEOUT_SECS);
    }

    log::info!("Shutdown complete");
    Ok(())
}
