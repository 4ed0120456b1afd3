use anyhow::Context;

use teachprompt_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    teachprompt_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let runtime = teachprompt_api::app::services::build_services(&config)
        .await
        .context("failed to wire services")?;

    let app = teachprompt_api::app::build_app(runtime.services.clone());

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    tracing::info!(addr = %listener.local_addr()?, workers = config.dispatcher.workers, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("http server stopped; draining dispatcher");
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .context("dispatcher shutdown panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
