pub mod config;
pub mod engine;
pub mod models;
pub mod services;

pub use config::Config;
pub use engine::{CatalogProvider, EngineError, MaintenanceHandle, RecommendationEngine};
pub use services::{
    BehaviorStore, FeatureExtractor, InsightEngine, Ranker, ScoringEnsemble, TextGenerator,
};
