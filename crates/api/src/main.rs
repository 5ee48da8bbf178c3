use anyhow::Context;

use carrion_api::app::{self, services::AppServices};
use carrion_infra::config::Config;
use carrion_infra::scheduler::CleanupScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    carrion_observability::init();

    let config = Config::from_env().context("invalid configuration")?;

    let orchestrator = app::services::build_orchestrator(&config).await?;
    let executor = orchestrator.spawn(config.executor.clone());
    let scheduler = CleanupScheduler::spawn(
        orchestrator.clone(),
        config.cleanup_interval,
        config.run_retention,
    );

    if config.ingest_api_key.is_none() {
        tracing::warn!("INGEST_API_KEY not set; ingest endpoints are unauthenticated");
    }
    let services = AppServices::new(orchestrator).with_monitor(executor.monitor());
    let router = app::build_app(services, config.ingest_api_key.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("shutting down");
    scheduler.shutdown().await;
    executor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
