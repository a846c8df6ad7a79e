//! Gateway binary: load configuration, wire up state, serve until SIGINT.

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Any configuration problem is fatal and exits non-zero.
    let settings = raggate::Settings::load().context("invalid configuration")?;
    let addr = settings.bind_addr();

    let state = raggate::server::AppState::initialize(settings).context("startup failed")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    log::info!("raggate listening on http://{addr} (chat at /ws)");

    axum::serve(listener, raggate::server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        log::warn!("failed to listen for shutdown signal");
        return;
    }
    log::info!("shutdown signal received");
}
