use checkout_service::config::CheckoutConfig;
use checkout_service::services::init_metrics;
use checkout_service::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").ok();
    init_tracing(
        "checkout-service",
        "info,checkout_service=debug",
        otlp_endpoint.as_deref(),
    )?;

    init_metrics()?;

    let config = CheckoutConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let application = Application::build(config)
        .await
        .map_err(|e| anyhow::anyhow!("Startup failed: {}", e))?;
    application.run_until_stopped().await?;

    Ok(())
}
