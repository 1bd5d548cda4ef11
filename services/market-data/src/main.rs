use anyhow::Context;
use market_data::api::{create_router, SERVICE_NAME};
use market_data::config::MarketDataConfig;
use market_data::logging;
use market_data::service::MarketDataService;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(SERVICE_NAME);

    let config = MarketDataConfig::from_env();
    config.validate().context("invalid configuration")?;

    tracing::info!("Starting market data service");

    let service = MarketDataService::start(&config)
        .await
        .context("failed to start market data service")?;

    let app = create_router(service.state.clone());
    let listener = TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;

    tracing::info!("Listening on {}", config.http_bind);

    let cancel = service.cancel_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
                _ = cancel.cancelled() => {}
            }
        })
        .await?;

    service.shutdown().await;
    Ok(())
}
