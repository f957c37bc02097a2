use data_service::config::DataConfig;
use data_service::services::init_metrics;
use data_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = DataConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "data-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    // Initialize metrics recorder (must be before any metrics are recorded)
    if let Err(e) = init_metrics() {
        tracing::warn!("Metrics disabled: {}", e);
    }

    tracing::info!(
        backend = ?config.backend,
        store = %config.mongodb.redacted_connection_string(),
        port = config.common.port,
        "Starting data-service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to start data-service: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await
}
