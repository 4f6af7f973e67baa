// ============================================
// Recommendation Engine
// ============================================
//
// Facade over the scoring, behavior and insight subsystems:
// - recommend(): candidate fetch -> profile -> ensemble -> rank
// - track_behavior(): infallible ingestion with synchronous insight
//   regeneration on conversion actions
// - insight queries
// - periodic maintenance loop (insight refresh, buffer trim, occasional
//   market regeneration) with an explicit shutdown handle

use crate::config::{EngineConfig, LlmConfig};
use crate::models::{
    BehaviorEvent, ItemFeatures, MarketInsight, MarketInsightFilters, RecommendationRequest,
    RecommendationResponse, UserInsight, UserPreferences, UserProfile,
};
use crate::services::behavior::BehaviorStore;
use crate::services::features::FeatureExtractor;
use crate::services::generation::{provider_from_config, GenerationParams, TextGenerator};
use crate::services::insights::InsightEngine;
use crate::services::ranking::Ranker;
use crate::services::scoring::ScoringEnsemble;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ALGORITHM: &str = "hybrid_ensemble_v1";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// External catalog collaborator supplying candidate items per request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch_candidates(
        &self,
        request: &RecommendationRequest,
    ) -> anyhow::Result<Vec<ItemFeatures>>;
}

pub struct RecommendationEngine {
    config: EngineConfig,
    catalog: Arc<dyn CatalogProvider>,
    extractor: Arc<FeatureExtractor>,
    store: Arc<BehaviorStore>,
    scoring: ScoringEnsemble,
    ranker: Ranker,
    insights: Arc<InsightEngine>,
    profiles: DashMap<String, UserProfile>,
    preferences: DashMap<String, UserPreferences>,
}

impl RecommendationEngine {
    pub fn new(
        config: EngineConfig,
        llm_config: &LlmConfig,
        catalog: Arc<dyn CatalogProvider>,
    ) -> Self {
        let generator = provider_from_config(llm_config);
        let insight_params = GenerationParams::from_config(llm_config);
        Self::build(config, generator, insight_params, catalog)
    }

    /// Construct with an explicit (possibly stubbed) generator.
    pub fn with_generator(
        config: EngineConfig,
        generator: Option<Arc<dyn TextGenerator>>,
        catalog: Arc<dyn CatalogProvider>,
    ) -> Self {
        Self::build(config, generator, GenerationParams::default(), catalog)
    }

    fn build(
        config: EngineConfig,
        generator: Option<Arc<dyn TextGenerator>>,
        insight_params: GenerationParams,
        catalog: Arc<dyn CatalogProvider>,
    ) -> Self {
        let extractor = Arc::new(FeatureExtractor::new(config.profile_ttl_hours));
        let store = Arc::new(BehaviorStore::new(config.max_events_per_user));
        let scoring = ScoringEnsemble::new(extractor.clone(), generator.clone());
        let ranker = Ranker::new(config.default_limit, config.default_diversity_factor);
        let insights = Arc::new(InsightEngine::new(
            store.clone(),
            generator,
            insight_params,
            config.market_min_behaviors,
        ));

        Self {
            config,
            catalog,
            extractor,
            store,
            scoring,
            ranker,
            insights,
            profiles: DashMap::new(),
            preferences: DashMap::new(),
        }
    }

    /// Seed the diversity coin flip; used by tests for determinism.
    pub fn with_ranker_seed(mut self, seed: u64) -> Self {
        self.ranker = Ranker::new(
            self.config.default_limit,
            self.config.default_diversity_factor,
        )
        .with_seed(seed);
        self
    }

    /// Register a user's stated preferences. Invalidates the cached
    /// profile so the next request rebuilds the feature vector.
    pub fn set_preferences(&self, user_id: &str, preferences: UserPreferences) {
        self.preferences.insert(user_id.to_string(), preferences);
        self.profiles.remove(user_id);
    }

    /// Produce a ranked, diversified recommendation list.
    ///
    /// Fails only on caller input defects (empty user id). Catalog and
    /// generation failures degrade the response instead of failing it.
    pub async fn recommend(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse, EngineError> {
        if request.user_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "user_id must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let request_id = Uuid::new_v4();

        let candidates = match self.catalog.fetch_candidates(&request).await {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    user_id = %request.user_id,
                    error = %e,
                    "Catalog fetch failed, returning degraded empty result"
                );
                Vec::new()
            }
        };

        let behaviors = self.store.events_for(&request.user_id);
        let profile = self.profile_for(&request.user_id, &behaviors);

        let results = self
            .scoring
            .score(&profile, behaviors.len(), &candidates, &request)
            .await;

        // Request-scoped lookup for filter and diversity steps
        let items_by_id = candidates
            .iter()
            .map(|item| (item.id.clone(), item.clone()))
            .collect();
        let results = self.ranker.finalize(results, &items_by_id, &request);

        info!(
            user_id = %request.user_id,
            request_id = %request_id,
            candidate_count = candidates.len(),
            result_count = results.len(),
            "Recommendations produced"
        );

        Ok(RecommendationResponse {
            user_id: request.user_id,
            request_id,
            total_results: results.len(),
            results,
            algorithm: ALGORITHM.to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Ingest a behavior event. Never raises, even when downstream
    /// analysis fails; conversion actions regenerate the user's insights
    /// before returning.
    pub async fn track_behavior(&self, mut event: BehaviorEvent) {
        // Clients may omit the session id; each such event becomes its
        // own single-event session
        if event.session_id.trim().is_empty() {
            event.session_id = Uuid::new_v4().to_string();
        }

        let user_id = event.user_id.clone();
        let is_conversion = self.store.record(event);

        if is_conversion {
            self.insights.regenerate_user_insights(&user_id).await;
        }
    }

    pub fn user_insights(&self, user_id: &str) -> Vec<UserInsight> {
        self.insights.user_insights(user_id)
    }

    pub fn market_insights(&self, filters: &MarketInsightFilters) -> Vec<MarketInsight> {
        self.insights.market_insights(filters)
    }

    pub fn behavior_store(&self) -> &Arc<BehaviorStore> {
        &self.store
    }

    fn profile_for(&self, user_id: &str, behaviors: &[BehaviorEvent]) -> UserProfile {
        if let Some(cached) = self.profiles.get(user_id) {
            if !self.extractor.is_stale(&cached) {
                return cached.clone();
            }
        }

        let preferences = self
            .preferences
            .get(user_id)
            .map(|p| p.clone())
            .unwrap_or_default();
        let profile = self.extractor.build_profile(user_id, behaviors, &preferences);
        self.profiles.insert(user_id.to_string(), profile.clone());
        profile
    }

    /// One maintenance pass: refresh every user's insights, trim buffers,
    /// and regenerate market insights when forced (the timer forces with
    /// the configured probability).
    pub async fn run_maintenance_tick(&self, force_market: bool) {
        let users = self.store.user_ids();
        debug!(user_count = users.len(), "Maintenance tick");

        for user_id in users {
            self.insights.regenerate_user_insights(&user_id).await;
        }

        self.store.trim_all(self.config.max_events_per_user);

        if force_market {
            self.insights.generate_market_insights().await;
        }
    }

    /// Start the periodic maintenance loop. The loop never blocks event
    /// ingestion; it runs on its own task until the handle is shut down.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let engine = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = Duration::from_millis(engine.config.maintenance_interval_ms);
        let market_probability = engine.config.market_refresh_probability;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let force_market =
                            rand::thread_rng().gen::<f64>() < market_probability;
                        engine.run_maintenance_tick(force_market).await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Maintenance loop stopping");
                        break;
                    }
                }
            }
        });

        MaintenanceHandle {
            shutdown_tx,
            handle,
        }
    }
}

pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the maintenance timer and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}
