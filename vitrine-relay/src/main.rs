use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vitrine_relay::{RelayConfig, RelayHub, router};

#[derive(Parser)]
#[command(name = "vitrine-relay", about = "Signaling relay for vitrine rooms")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Milliseconds a dropped peer keeps its room membership.
    #[arg(long, default_value_t = 10_000)]
    eviction_grace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = RelayConfig {
        bind: cli.bind,
        eviction_grace: Duration::from_millis(cli.eviction_grace_ms),
    };

    let hub = RelayHub::new(&config);
    let app = router(hub);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Signaling relay listening on ws://{}/ws/{{peer_id}}", config.bind);

    axum::serve(listener, app).await.context("Relay server stopped")?;
    Ok(())
}
