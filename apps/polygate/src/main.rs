use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let boot = polygate_core::bootstrap::bootstrap_from_env().await?;
    let host = boot.global.host.clone();
    let port = boot.global.port;

    let app = polygate_router::router(boot.orchestrator.clone());

    let bind = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;

    boot.shutdown().await;
    Ok(())
}
