mod config;
mod metrics;
mod net_util;
mod transport;
mod zone_watch;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::RwLock;

use config::Args;
use dns_types::zones::types::ZoneStore;
use transport::Shared;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();

    if args.needs_tls() && (args.tls_cert.is_none() || args.tls_key.is_none()) {
        eprintln!("--enable-dot/--enable-doh require both --tls-cert and --tls-key");
        std::process::exit(1);
    }

    let zone_files = collect_zone_files(&args).await?;
    if zone_files.is_empty() {
        tracing::warn!("no zone files configured; the server will answer NXDOMAIN to everything");
    }

    let store = zone_watch::load_all(&zone_files).await;
    tracing::info!(zones = store.len(), "loaded zones");
    let zones = Arc::new(RwLock::new(store));
    let shared = Shared { zones: zones.clone() };

    let mut tasks = tokio::task::JoinSet::new();

    let udp_socket = UdpSocket::bind((args.address, args.port)).await?;
    tracing::info!(address = %udp_socket.local_addr()?, "listening for UDP");
    tasks.spawn(transport::udp::listen(shared.clone(), udp_socket, args.edns_udp_max));

    let tcp_listener = TcpListener::bind((args.address, args.port)).await?;
    tracing::info!(address = %tcp_listener.local_addr()?, "listening for TCP");
    tasks.spawn(transport::tcp::listen(
        shared.clone(),
        tcp_listener,
        args.max_connections,
        std::time::Duration::from_secs(args.tcp_idle_timeout_secs),
    ));

    if args.enable_dot {
        let cert = args.tls_cert.as_ref().expect("checked above");
        let key = args.tls_key.as_ref().expect("checked above");
        let acceptor = transport::dot::load_acceptor(cert, key)?;
        let dot_listener = TcpListener::bind((args.address, args.dot_port)).await?;
        tracing::info!(address = %dot_listener.local_addr()?, "listening for DoT");
        tasks.spawn(transport::dot::listen(
            shared.clone(),
            dot_listener,
            acceptor,
            args.max_connections,
            std::time::Duration::from_secs(args.dot_idle_timeout_secs),
        ));
    }

    if args.enable_doh {
        let cert = args.tls_cert.as_ref().expect("checked above");
        let key = args.tls_key.as_ref().expect("checked above");
        let tls_config = transport::doh::load_tls_config(cert, key)?;
        let doh_address = std::net::SocketAddr::from((args.address, args.doh_port));
        tracing::info!(address = %doh_address, "listening for DoH");
        let doh_shared = shared.clone();
        let doh_path = args.doh_path.clone();
        let doh_request_timeout =
            std::time::Duration::from_secs(args.doh_request_timeout_secs);
        tasks.spawn(async move {
            if let Err(error) = transport::doh::serve(
                doh_address,
                doh_shared,
                tls_config,
                doh_path,
                doh_request_timeout,
            )
            .await
            {
                tracing::error!(?error, "DoH server exited");
            }
        });
    }

    if args.zone_reload_interval_seconds > 0 {
        tasks.spawn(zone_watch::poll_for_changes(
            zone_files,
            zones.clone(),
            tokio::time::Duration::from_secs(args.zone_reload_interval_seconds),
        ));
    }

    if let Some(metrics_address) = args.metrics_address {
        tracing::info!(address = %metrics_address, "serving metrics");
        tasks.spawn(async move {
            if let Err(error) = metrics::serve(metrics_address).await {
                tracing::error!(?error, "metrics server exited");
            }
        });
    }

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutting down");
        }
        Some(result) = tasks.join_next() => {
            if let Err(error) = result {
                tracing::error!(?error, "a server task panicked");
            }
        }
    }

    Ok(())
}

async fn collect_zone_files(args: &Args) -> std::io::Result<Vec<PathBuf>> {
    let mut files = args.zone_file.clone();

    for dir in &args.zones_dir {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
    }

    Ok(files)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
