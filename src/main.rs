use recommendation_service::engine::CatalogProvider;
use recommendation_service::models::{ItemFeatures, RecommendationRequest};
use recommendation_service::{Config, RecommendationEngine};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Standalone runs have no catalog wired; recommendation calls come
/// through the library API of an embedding service.
struct NoopCatalog;

#[async_trait::async_trait]
impl CatalogProvider for NoopCatalog {
    async fn fetch_candidates(
        &self,
        _request: &RecommendationRequest,
    ) -> anyhow::Result<Vec<ItemFeatures>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env();

    info!(
        service = %config.service.service_name,
        maintenance_interval_ms = config.engine.maintenance_interval_ms,
        llm_enabled = config.llm.enabled,
        "Starting recommendation engine"
    );

    let engine = Arc::new(RecommendationEngine::new(
        config.engine,
        &config.llm,
        Arc::new(NoopCatalog),
    ));

    let maintenance = engine.start_maintenance();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    maintenance.shutdown().await;

    Ok(())
}
