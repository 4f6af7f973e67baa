pub mod behavior;
pub mod features;
pub mod generation;
pub mod insights;
pub mod ranking;
pub mod scoring;

pub use behavior::{extract_patterns, BehaviorPatterns, BehaviorStore};
pub use features::FeatureExtractor;
pub use generation::{provider_from_config, GenerationParams, TextGenerator};
pub use insights::InsightEngine;
pub use ranking::Ranker;
pub use scoring::ScoringEnsemble;
