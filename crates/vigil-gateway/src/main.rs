use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::VigilConfig;
use vigil_hub::{Hub, HubSettings};

mod app;
mod auth;
mod http;
mod monitor;
mod store;
mod ws;

/// Real-time monitoring dashboard backend.
#[derive(Debug, Parser)]
#[command(name = "vigil-gateway", version, about)]
struct Cli {
    /// Path to vigil.toml (default: ~/.vigil/vigil.toml).
    #[arg(long)]
    config: Option<String>,

    /// Address to bind, overriding `gateway.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overriding `gateway.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_gateway=info,vigil_hub=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = VigilConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        VigilConfig::default()
    });
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    // one token fans out to the hub, the monitor, and the HTTP server
    let shutdown = CancellationToken::new();

    let (hub, hub_task) = Hub::spawn(HubSettings::from(&config.hub), &shutdown);
    let store = Arc::new(store::DashboardStore::new(&config.dashboard));

    let monitor_task = if config.monitor.targets.is_empty() {
        None
    } else {
        let probe = monitor::HttpProbe::new(Duration::from_secs(config.monitor.timeout_secs.max(1)))?;
        let monitor = monitor::HealthMonitor::new(
            &config.monitor,
            Arc::new(probe),
            Arc::clone(&store),
            hub.clone(),
        );
        Some(tokio::spawn(monitor.run(shutdown.child_token())))
    };

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, hub, store));
    info!(auth = ?state.auth.mode(), "auth configured");
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Vigil gateway listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    // the server may also stop on its own; make sure everything follows
    shutdown.cancel();
    if let Some(task) = monitor_task {
        task.await?;
    }
    hub_task.await?;
    info!("Vigil gateway stopped");
    Ok(())
}

/// Resolve on Ctrl-C, cancelling `shutdown` so the hub closes every socket
/// while the server drains.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
