mod admin;
mod config;
mod error;
mod forward;
mod janitor;
mod policy;
mod proxy;
mod rewrite;
#[cfg(test)]
mod testing;
mod transport;

use admin::AdminState;
use clap::Parser;
use config::{Config, Overrides};
use forward::UpstreamClient;
use proxy::AppState;
use proxy_cache::ResponseCache;
use std::error::Error;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use transport::CachingTransport;

/// Caching forward proxy: serves repeated requests from memory.
#[derive(Parser, Debug)]
#[command(name = "caching-proxy", version)]
struct Cli {
    /// Port on which the proxy will listen
    #[arg(short, long)]
    port: Option<u16>,

    /// Origin server URL to forward requests to
    #[arg(short, long)]
    origin: Option<String>,

    /// Optional TOML config file; command-line values take precedence
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Address of the admin listener (cache clear, stats, metrics)
    #[arg(long)]
    admin_addr: Option<String>,

    /// Clear the cache of the running proxy and exit
    #[arg(long)]
    clear_cache: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let clear_cache = cli.clear_cache;

    let result = match load_config(cli) {
        Ok(config) if clear_cache => clear_remote_cache(&config).await,
        Ok(config) => serve(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "caching proxy failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: Cli) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::load_or_default(&cli.config)?;
    config.apply(Overrides {
        port: cli.port,
        origin: cli.origin,
        admin_addr: cli.admin_addr,
    });
    Ok(config)
}

async fn clear_remote_cache(config: &Config) -> Result<(), Box<dyn Error>> {
    let admin_addr = config.admin_addr()?;
    let report = admin::request_clear(admin_addr).await?;
    tracing::info!(admin = %admin_addr, cleared = report.cleared, "cache cleared");
    println!("Cache cleared! ({} entries removed)", report.cleared);
    Ok(())
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let origin = config.origin()?;
    let proxy_addr = config.listen_addr()?;
    let admin_addr = config.admin_addr()?;

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        proxy = %proxy_addr,
        admin = %admin_addr,
        origin = %origin.authority(),
        ttl_seconds = config.cache.ttl_seconds,
        max_redirects = config.cache.max_redirects,
        "caching proxy starting"
    );

    let forwarder = UpstreamClient::new(config.upstream_timeout());
    let transport = CachingTransport::new(forwarder, Arc::new(ResponseCache::new()))
        .with_ttl(config.cache_ttl())
        .with_max_redirects(config.cache.max_redirects)
        .with_max_body_bytes(config.server.max_body_bytes);
    let cache = Arc::clone(transport.cache());
    let state = Arc::new(AppState { origin, transport });

    // Shutdown token for graceful shutdown
    let shutdown = CancellationToken::new();

    tokio::spawn(janitor::sweep_expired(
        Arc::clone(&cache),
        config.sweep_interval(),
        shutdown.clone(),
    ));

    let proxy_router = proxy::router(state);
    let admin_router = admin::admin_router(AdminState { cache, prometheus });

    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr)
        .await
        .map_err(|e| format!("failed to bind proxy to {proxy_addr}: {e}"))?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .map_err(|e| format!("failed to bind admin listener to {admin_addr}: {e}"))?;

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    let proxy_future = axum::serve(proxy_listener, proxy_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let admin_future = axum::serve(admin_listener, admin_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let outcome = tokio::select! {
        result = proxy_future => result.map_err(|e| format!("proxy server error: {e}")),
        result = admin_future => result.map_err(|e| format!("admin server error: {e}")),
    };
    shutdown.cancel();

    outcome?;
    tracing::info!("caching proxy shut down");
    Ok(())
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}
