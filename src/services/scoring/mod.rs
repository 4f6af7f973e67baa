// ============================================
// Scoring Ensemble
// ============================================
//
// Computes four independent signals per candidate and combines them:
// - collaborative: cosine similarity between user and item vectors
// - content: weighted preference/attribute matches
// - context: request-context fit (category, budget, popularity, recency)
// - generative: score parsed from a text-generation completion
//
// A generation failure degrades only the generative signal of that one
// candidate (fixed 0.5 fallback); it never aborts the batch.

use crate::models::{
    ItemFeatures, RecommendationRequest, RecommendationResult, UserProfile,
};
use crate::services::features::{cosine_similarity, FeatureExtractor};
use crate::services::generation::{GenerationParams, TextGenerator};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ensemble combination weights: collaborative, content, context, generative.
const WEIGHTS: [f32; 4] = [0.3, 0.3, 0.2, 0.2];

/// Fallback generative score on provider or parse failure.
const GENERATIVE_FALLBACK: f32 = 0.5;

pub struct ScoringEnsemble {
    extractor: Arc<FeatureExtractor>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl ScoringEnsemble {
    pub fn new(
        extractor: Arc<FeatureExtractor>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            extractor,
            generator,
        }
    }

    /// Score candidates for a user. Results are unranked (rank = 0).
    ///
    /// `behavior_count` is the user's buffered event count, used for the
    /// data-sufficiency confidence boost.
    pub async fn score(
        &self,
        profile: &UserProfile,
        behavior_count: usize,
        candidates: &[ItemFeatures],
        request: &RecommendationRequest,
    ) -> Vec<RecommendationResult> {
        let mut results = Vec::with_capacity(candidates.len());

        for item in candidates {
            let item_vector = if item.feature_vector.is_empty() {
                self.extractor.item_vector(item)
            } else {
                item.feature_vector.clone()
            };

            let collaborative =
                cosine_similarity(&profile.feature_vector, &item_vector).clamp(0.0, 1.0);
            let content = content_score(profile, item);
            let context = context_score(item, request);
            let generative = self.generative_score(profile, item, request).await;

            let score = WEIGHTS[0] * collaborative
                + WEIGHTS[1] * content
                + WEIGHTS[2] * context
                + WEIGHTS[3] * generative;

            let confidence = confidence_score(profile, behavior_count, item);
            let reasons = build_reasons(profile, item, collaborative, content);

            debug!(
                item_id = %item.id,
                collaborative,
                content,
                context,
                generative,
                score,
                "Candidate scored"
            );

            let mut metadata = std::collections::HashMap::new();
            metadata.insert(
                "signals".to_string(),
                serde_json::json!({
                    "collaborative": collaborative,
                    "content": content,
                    "context": context,
                    "generative": generative,
                }),
            );

            results.push(RecommendationResult {
                id: item.id.clone(),
                item_type: item.item_type,
                score,
                confidence,
                reasons,
                metadata,
                rank: 0,
            });
        }

        results
    }

    async fn generative_score(
        &self,
        profile: &UserProfile,
        item: &ItemFeatures,
        request: &RecommendationRequest,
    ) -> f32 {
        let Some(generator) = &self.generator else {
            return GENERATIVE_FALLBACK;
        };

        let prompt = build_score_prompt(profile, item, request);
        // The score prompt expects a single numeric token back; a tiny
        // zero-temperature budget keeps parsing stable, independent of
        // the configured full-text parameters
        let params = GenerationParams {
            max_tokens: 16,
            temperature: 0.0,
            metadata: Default::default(),
        };

        match generator.generate(&prompt, &params).await {
            Ok(completion) => parse_score_token(&completion.text).unwrap_or_else(|| {
                warn!(
                    item_id = %item.id,
                    response = %completion.text,
                    "No score token in completion, using fallback"
                );
                GENERATIVE_FALLBACK
            }),
            Err(e) => {
                warn!(
                    item_id = %item.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Generative scoring failed, using fallback"
                );
                GENERATIVE_FALLBACK
            }
        }
    }
}

fn build_score_prompt(
    profile: &UserProfile,
    item: &ItemFeatures,
    request: &RecommendationRequest,
) -> String {
    format!(
        "You score how well a catalog item fits a user.\n\n\
         User preferred categories: {}\n\
         User preferred locations: {}\n\
         User segments: {}\n\n\
         Item categories: {}\n\
         Item location: {}\n\
         Item price: {}\n\
         Item rating: {}\n\n\
         Request category: {}\n\
         Request budget: {}\n\n\
         Reply with a single number between 0 and 1.",
        profile.preferences.categories.join(", "),
        profile.preferences.locations.join(", "),
        profile.segments.join(", "),
        item.categories.join(", "),
        item.location.as_deref().unwrap_or("unknown"),
        item.price.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string()),
        item.rating.map(|r| r.to_string()).unwrap_or_else(|| "unrated".to_string()),
        request.context.category.as_deref().unwrap_or("none"),
        request
            .context
            .budget
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".to_string()),
    )
}

/// First whitespace-separated token parseable as an f32 in [0, 1].
fn parse_score_token(text: &str) -> Option<f32> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_ascii_digit()))
        .filter_map(|t| t.parse::<f32>().ok())
        .find(|v| (0.0..=1.0).contains(v))
}

fn category_match(profile: &UserProfile, item: &ItemFeatures) -> bool {
    item.categories.iter().any(|c| {
        profile
            .preferences
            .categories
            .iter()
            .any(|p| p.eq_ignore_ascii_case(c))
    })
}

fn content_score(profile: &UserProfile, item: &ItemFeatures) -> f32 {
    let mut score: f32 = 0.0;

    if category_match(profile, item) {
        score += 0.4;
    }

    if let (Some(price), Some(range)) = (item.price, &profile.preferences.price_range) {
        if price >= range.min && price <= range.max {
            score += 0.3;
        }
    }

    if let Some(location) = &item.location {
        let location = location.to_lowercase();
        let matched = profile
            .preferences
            .locations
            .iter()
            .any(|l| location.contains(&l.to_lowercase()));
        if matched {
            score += 0.2;
        }
    }

    if item.rating.unwrap_or(0.0) > 4.0 {
        score += 0.1;
    }

    score.min(1.0)
}

fn context_score(item: &ItemFeatures, request: &RecommendationRequest) -> f32 {
    let mut score = 0.5;

    if let Some(category) = &request.context.category {
        if item
            .categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
        {
            score += 0.3;
        }
    }

    if let (Some(price), Some(budget)) = (item.price, request.context.budget) {
        if price <= budget {
            score += 0.2;
        } else {
            score -= 0.2;
        }
    }

    score += 0.1 * item.popularity.unwrap_or(0.0);
    score += 0.1 * item.recency.unwrap_or(0.0);

    score.clamp(0.0, 1.0)
}

fn confidence_score(profile: &UserProfile, behavior_count: usize, item: &ItemFeatures) -> f32 {
    let mut confidence: f32 = 0.5;
    if behavior_count > 10 {
        confidence += 0.2;
    }
    if !profile.preferences.categories.is_empty() {
        confidence += 0.1;
    }
    if item.rating.is_some() {
        confidence += 0.1;
    }
    if item.description.is_some() {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

fn build_reasons(
    profile: &UserProfile,
    item: &ItemFeatures,
    collaborative: f32,
    content: f32,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if content > 0.6 && category_match(profile, item) {
        reasons.push("matches your preferred categories".to_string());
    }
    if item.rating.unwrap_or(0.0) > 4.0 {
        reasons.push("highly rated".to_string());
    }
    if item.popularity.unwrap_or(0.0) > 0.7 {
        reasons.push("popular among similar users".to_string());
    }
    if collaborative > 0.7 {
        reasons.push("similar users also liked this".to_string());
    }
    if reasons.is_empty() {
        reasons.push("recommended for you based on your activity".to_string());
    }

    reasons
}
