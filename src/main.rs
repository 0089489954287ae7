use std::env;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use motor_analitico::{app, build_state_from_env};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging. Reads RUST_LOG.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let state = build_state_from_env().await?;
    tracing::info!(
        model = %state.config.model.model,
        engine_version = %state.config.engine_version,
        production = state.config.production,
        timeout_ms = state.config.model.timeout_ms,
        "engine configured"
    );

    // Stale rate-limit windows would otherwise accumulate one entry per client.
    let limiter = state.limiter.clone();
    let purge_every = Duration::from_secs(state.config.rate_limit.window_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            ticker.tick().await;
            limiter.purge_expired(Instant::now());
        }
    });

    let app = app(state);

    let port: u16 = match env::var("PORT") {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid port number"))?,
        Err(_) => 3000,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
