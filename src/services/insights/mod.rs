// ============================================
// Insight Generator
// ============================================
//
// Derives actionable insights from buffered behavior:
// - deterministic statistical rules, always evaluated
// - optional AI-augmented insights from the text-generation service
// - market-level insights aggregated across all users
//
// User insights replace the prior set wholesale on each regeneration.
// Market insights are regenerated as a full replacement set; a failed
// regeneration preserves the previous cache rather than clearing it.

use crate::models::{
    Impact, MarketInsight, MarketInsightFilters, MarketInsightKind, UserInsight, UserInsightKind,
};
use crate::services::behavior::{extract_patterns, BehaviorPatterns, BehaviorStore};
use crate::services::generation::{extract_json_block, GenerationParams, TextGenerator};
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct InsightEngine {
    store: Arc<BehaviorStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    /// Generation parameters for every insight call, from operator config
    params: GenerationParams,
    /// Minimum buffered behaviors across all users for market insights
    market_min_behaviors: usize,
    user_insights: DashMap<String, Arc<Vec<UserInsight>>>,
    /// Copy-on-replace: readers see the fully-old or fully-new set
    market_insights: RwLock<Arc<Vec<MarketInsight>>>,
}

impl InsightEngine {
    pub fn new(
        store: Arc<BehaviorStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        params: GenerationParams,
        market_min_behaviors: usize,
    ) -> Self {
        Self {
            store,
            generator,
            params,
            market_min_behaviors,
            user_insights: DashMap::new(),
            market_insights: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Rebuild the user's insight set from their buffered behavior.
    /// Replaces any prior set. Never fails; AI failures contribute zero
    /// AI insights while statistical insights are unaffected.
    pub async fn regenerate_user_insights(&self, user_id: &str) {
        let behaviors = self.store.events_for(user_id);
        let patterns = extract_patterns(&behaviors);

        let mut insights = statistical_insights(user_id, &patterns);
        insights.extend(self.ai_user_insights(user_id, &patterns).await);

        debug!(
            user_id = user_id,
            insight_count = insights.len(),
            "User insights regenerated"
        );
        self.user_insights
            .insert(user_id.to_string(), Arc::new(insights));
    }

    pub fn user_insights(&self, user_id: &str) -> Vec<UserInsight> {
        self.user_insights
            .get(user_id)
            .map(|set| set.as_ref().clone())
            .unwrap_or_default()
    }

    /// Market insights sorted by confidence descending, optionally
    /// filtered by kind and category.
    pub fn market_insights(&self, filters: &MarketInsightFilters) -> Vec<MarketInsight> {
        let snapshot = {
            let guard = self
                .market_insights
                .read()
                .unwrap_or_else(|e| e.into_inner());
            Arc::clone(&guard)
        };

        let mut selected: Vec<MarketInsight> = snapshot
            .iter()
            .filter(|m| filters.kind.map_or(true, |k| m.kind == k))
            .filter(|m| {
                filters.category.as_ref().map_or(true, |c| {
                    m.category
                        .as_ref()
                        .map_or(false, |mc| mc.eq_ignore_ascii_case(c))
                })
            })
            .cloned()
            .collect();

        selected.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        selected
    }

    /// Regenerate the market insight set from all buffered behavior.
    ///
    /// Returns the fresh set (empty below the data threshold). On a
    /// generation or parse failure the previous cached set is preserved
    /// and an empty vec is returned for this cycle.
    pub async fn generate_market_insights(&self) -> Vec<MarketInsight> {
        let total = self.store.total_events();
        if total < self.market_min_behaviors {
            debug!(
                total_events = total,
                threshold = self.market_min_behaviors,
                "Not enough data for market insights"
            );
            return Vec::new();
        }

        let Some(generator) = &self.generator else {
            return Vec::new();
        };

        let events = self.store.all_events();
        let patterns = extract_patterns(&events);
        let prompt = build_market_prompt(total, self.store.user_ids().len(), &patterns);

        let completion = match generator.generate(&prompt, &self.params).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Market insight generation failed, keeping previous set");
                return Vec::new();
            }
        };

        let decoded: Vec<AiMarketInsight> =
            match serde_json::from_str(extract_json_block(&completion.text)) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "Market insight response did not match schema, keeping previous set");
                    return Vec::new();
                }
            };

        let now = Utc::now();
        let insights: Vec<MarketInsight> = decoded
            .into_iter()
            .map(|d| MarketInsight {
                id: Uuid::new_v4(),
                kind: MarketInsightKind::from_str(&d.kind),
                category: d.category,
                location: d.location,
                insight: d.insight,
                impact: Impact::from_str(&d.impact),
                confidence: d.confidence.clamp(0.0, 1.0),
                data: d.data,
                recommendations: d.recommendations,
                created_at: now,
            })
            .collect();

        info!(count = insights.len(), "Market insights regenerated");
        let mut guard = self
            .market_insights
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(insights.clone());
        insights
    }

    async fn ai_user_insights(
        &self,
        user_id: &str,
        patterns: &BehaviorPatterns,
    ) -> Vec<UserInsight> {
        let Some(generator) = &self.generator else {
            return Vec::new();
        };

        let prompt = build_user_prompt(patterns);
        let completion = match generator.generate(&prompt, &self.params).await {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "AI insight generation failed");
                return Vec::new();
            }
        };

        let decoded: Vec<AiUserInsight> =
            match serde_json::from_str(extract_json_block(&completion.text)) {
                Ok(d) => d,
                Err(e) => {
                    warn!(user_id = user_id, error = %e, "AI insight response did not match schema");
                    return Vec::new();
                }
            };

        let now = Utc::now();
        decoded
            .into_iter()
            .map(|d| UserInsight {
                user_id: user_id.to_string(),
                kind: UserInsightKind::from_str(&d.kind),
                insight: d.insight,
                confidence: d.confidence.clamp(0.0, 1.0),
                evidence: d.evidence,
                actionable: d.actionable,
                recommendations: d.recommendations,
                created_at: now,
            })
            .collect()
    }
}

// ============================================
// LLM response schemas
// ============================================

#[derive(Deserialize)]
struct AiUserInsight {
    #[serde(rename = "type")]
    kind: String,
    insight: String,
    confidence: f32,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    actionable: bool,
    #[serde(default)]
    recommendations: Vec<String>,
}

#[derive(Deserialize)]
struct AiMarketInsight {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    location: Option<String>,
    insight: String,
    #[serde(default = "default_impact")]
    impact: String,
    confidence: f32,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    recommendations: Vec<String>,
}

fn default_impact() -> String {
    "medium".to_string()
}

// ============================================
// Statistical rules
// ============================================

/// Deterministic rules, always evaluated regardless of AI availability.
pub fn statistical_insights(user_id: &str, patterns: &BehaviorPatterns) -> Vec<UserInsight> {
    let mut insights = Vec::new();
    let now = Utc::now();
    let total_events: usize = patterns.action_frequency.values().sum();

    if patterns.avg_actions_per_session > 10.0 {
        insights.push(UserInsight {
            user_id: user_id.to_string(),
            kind: UserInsightKind::Behavior,
            insight: format!(
                "Highly engaged user averaging {:.1} actions per session",
                patterns.avg_actions_per_session
            ),
            confidence: 0.9,
            evidence: vec![format!(
                "{} sessions, {:.1} actions per session",
                patterns.sessions.len(),
                patterns.avg_actions_per_session
            )],
            actionable: true,
            recommendations: vec![
                "Surface advanced search and comparison tools".to_string(),
                "Enable saved-search notifications".to_string(),
            ],
            created_at: now,
        });
    }

    if total_events > 0 {
        if let Some((category, count)) = patterns
            .category_preferences
            .iter()
            .max_by_key(|(_, count)| **count)
        {
            let share = *count as f64 / total_events as f64;
            if share > 0.3 {
                insights.push(UserInsight {
                    user_id: user_id.to_string(),
                    kind: UserInsightKind::Preference,
                    insight: format!(
                        "Strong preference for the {} category ({:.0}% of activity)",
                        category,
                        share * 100.0
                    ),
                    confidence: 0.8,
                    evidence: vec![format!("{} of {} events in {}", count, total_events, category)],
                    actionable: true,
                    recommendations: vec![
                        format!("Prioritize {} items in recommendations", category),
                        "Send category-specific alerts".to_string(),
                    ],
                    created_at: now,
                });
            }
        }

        if let Some((bucket, count)) =
            patterns.time_buckets.iter().max_by_key(|(_, count)| **count)
        {
            let share = *count as f64 / total_events as f64;
            if share > 0.4 {
                insights.push(UserInsight {
                    user_id: user_id.to_string(),
                    kind: UserInsightKind::Behavior,
                    insight: format!(
                        "Most active during the {} ({:.0}% of activity)",
                        bucket.as_str(),
                        share * 100.0
                    ),
                    confidence: 0.7,
                    evidence: vec![format!("{} of {} events", count, total_events)],
                    actionable: true,
                    recommendations: vec![format!(
                        "Schedule notifications for the {}",
                        bucket.as_str()
                    )],
                    created_at: now,
                });
            }
        }
    }

    if patterns.conversion_rate > 0.2 {
        insights.push(UserInsight {
            user_id: user_id.to_string(),
            kind: UserInsightKind::Prediction,
            insight: format!(
                "High conversion potential ({:.0}% of sessions convert)",
                patterns.conversion_rate * 100.0
            ),
            confidence: 0.8,
            evidence: vec![format!(
                "{:.2} conversion rate over {} sessions",
                patterns.conversion_rate,
                patterns.sessions.len()
            )],
            actionable: true,
            recommendations: vec![
                "Offer direct booking shortcuts".to_string(),
                "Highlight limited availability".to_string(),
            ],
            created_at: now,
        });
    }

    insights
}

// ============================================
// Prompt construction
// ============================================

fn build_user_prompt(patterns: &BehaviorPatterns) -> String {
    let mut prompt = String::from(
        "You are a user behavior analyst for a marketplace. \
         Analyze these behavior patterns and produce insights.\n\n",
    );

    prompt.push_str("Action frequencies:\n");
    for (action, count) in &patterns.action_frequency {
        prompt.push_str(&format!("  - {}: {}\n", action.as_str(), count));
    }

    prompt.push_str("Category activity:\n");
    for (category, count) in &patterns.category_preferences {
        prompt.push_str(&format!("  - {}: {}\n", category, count));
    }

    prompt.push_str("Time-of-day activity:\n");
    for (bucket, count) in &patterns.time_buckets {
        prompt.push_str(&format!("  - {}: {}\n", bucket.as_str(), count));
    }

    prompt.push_str(&format!(
        "Sessions: {} (avg {:.1} actions, avg {:.0}s, conversion rate {:.2})\n\n",
        patterns.sessions.len(),
        patterns.avg_actions_per_session,
        patterns.avg_session_duration_secs,
        patterns.conversion_rate
    ));

    prompt.push_str(
        r#"Return ONLY a JSON array in this exact format:
[
  {"type": "preference|behavior|prediction|segment", "insight": "...", "confidence": 0.0-1.0, "evidence": ["..."], "actionable": true, "recommendations": ["..."]}
]
"#,
    );
    prompt
}

fn build_market_prompt(total_events: usize, user_count: usize, patterns: &BehaviorPatterns) -> String {
    let mut prompt = format!(
        "You are a market analyst for a marketplace. Aggregated behavior \
         across {} users ({} events):\n\n",
        user_count, total_events
    );

    prompt.push_str("Category demand:\n");
    for (category, count) in &patterns.category_preferences {
        prompt.push_str(&format!("  - {}: {}\n", category, count));
    }

    prompt.push_str("Location demand:\n");
    for (location, count) in &patterns.location_frequency {
        prompt.push_str(&format!("  - {}: {}\n", location, count));
    }

    prompt.push_str("Activity by time of day:\n");
    for (bucket, count) in &patterns.time_buckets {
        prompt.push_str(&format!("  - {}: {}\n", bucket.as_str(), count));
    }

    prompt.push_str("Action mix:\n");
    for (action, count) in &patterns.action_frequency {
        prompt.push_str(&format!("  - {}: {}\n", action.as_str(), count));
    }

    prompt.push_str(
        r#"
Return ONLY a JSON array in this exact format:
[
  {"type": "trend|demand|pricing|competition|opportunity", "category": "...", "location": "...", "insight": "...", "impact": "low|medium|high", "confidence": 0.0-1.0, "data": {}, "recommendations": ["..."]}
]
"#,
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, BehaviorEvent, EntityType, EventMetadata};
    use crate::services::generation::{Completion, GenerationError, TokenUsage};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    struct ScriptedGenerator(String);

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> crate::services::generation::Result<Completion> {
            Ok(Completion {
                text: self.0.clone(),
                tokens_used: TokenUsage::default(),
                cost_estimate: 0.0,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> crate::services::generation::Result<Completion> {
            Err(GenerationError::Http("unreachable".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn event(user: &str, session: &str, action: ActionType, offset: i64) -> BehaviorEvent {
        BehaviorEvent {
            user_id: user.to_string(),
            action,
            entity_type: EntityType::Listing,
            entity_id: "e1".to_string(),
            session_id: session.to_string(),
            metadata: EventMetadata {
                category: Some("electronics".to_string()),
                ..Default::default()
            },
            location: None,
            device: None,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap()
                + Duration::seconds(offset),
        }
    }

    #[test]
    fn test_scenario_twelve_views_single_session() {
        // 12 views in one session: engagement rule fires (12 > 10) and the
        // category rule fires at 100% share with confidence 0.8.
        let events: Vec<BehaviorEvent> = (0..12)
            .map(|i| event("u1", "s1", ActionType::View, i))
            .collect();
        let patterns = extract_patterns(&events);
        let insights = statistical_insights("u1", &patterns);

        let engagement = insights
            .iter()
            .find(|i| i.kind == UserInsightKind::Behavior && i.confidence == 0.9);
        assert!(engagement.is_some());

        let preference = insights
            .iter()
            .find(|i| i.kind == UserInsightKind::Preference)
            .unwrap();
        assert_eq!(preference.confidence, 0.8);
        assert!(preference.insight.contains("electronics"));
    }

    #[test]
    fn test_engagement_rule_not_firing_at_ten() {
        let events: Vec<BehaviorEvent> = (0..10)
            .map(|i| event("u1", "s1", ActionType::View, i))
            .collect();
        let patterns = extract_patterns(&events);
        let insights = statistical_insights("u1", &patterns);
        assert!(!insights.iter().any(|i| i.confidence == 0.9));
    }

    #[test]
    fn test_conversion_rule() {
        let events = vec![
            event("u1", "s1", ActionType::Book, 0),
            event("u1", "s2", ActionType::View, 100),
            event("u1", "s3", ActionType::View, 200),
        ];
        let patterns = extract_patterns(&events);
        let insights = statistical_insights("u1", &patterns);
        let prediction = insights
            .iter()
            .find(|i| i.kind == UserInsightKind::Prediction)
            .unwrap();
        assert_eq!(prediction.confidence, 0.8);
    }

    #[tokio::test]
    async fn test_user_insights_replace_prior_set() {
        let store = Arc::new(BehaviorStore::new(100));
        let engine = InsightEngine::new(store.clone(), None, GenerationParams::default(), 100);

        for i in 0..12 {
            store.record(event("u1", "s1", ActionType::View, i));
        }
        engine.regenerate_user_insights("u1").await;
        let first = engine.user_insights("u1");
        assert!(!first.is_empty());

        engine.regenerate_user_insights("u1").await;
        let second = engine.user_insights("u1");
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn test_ai_failure_leaves_statistical_insights() {
        let store = Arc::new(BehaviorStore::new(100));
        let engine = InsightEngine::new(
            store.clone(),
            Some(Arc::new(FailingGenerator)),
            GenerationParams::default(),
            100,
        );

        for i in 0..12 {
            store.record(event("u1", "s1", ActionType::View, i));
        }
        engine.regenerate_user_insights("u1").await;

        let insights = engine.user_insights("u1");
        assert!(insights.iter().any(|i| i.confidence == 0.9));
    }

    #[tokio::test]
    async fn test_ai_insights_decoded_from_json() {
        let store = Arc::new(BehaviorStore::new(100));
        let response = r#"```json
[{"type": "prediction", "insight": "Likely to book within a week", "confidence": 1.4, "evidence": ["daily visits"], "actionable": true, "recommendations": ["send a reminder"]}]
```"#;
        let engine = InsightEngine::new(
            store.clone(),
            Some(Arc::new(ScriptedGenerator(response.to_string()))),
            GenerationParams::default(),
            100,
        );

        store.record(event("u1", "s1", ActionType::View, 0));
        engine.regenerate_user_insights("u1").await;

        let insights = engine.user_insights("u1");
        let ai = insights
            .iter()
            .find(|i| i.kind == UserInsightKind::Prediction)
            .unwrap();
        // Out-of-range confidence is clamped on decode
        assert_eq!(ai.confidence, 1.0);
        assert_eq!(ai.evidence, vec!["daily visits".to_string()]);
    }

    #[tokio::test]
    async fn test_market_insights_below_threshold_empty() {
        let store = Arc::new(BehaviorStore::new(100));
        let engine = InsightEngine::new(
            store.clone(),
            Some(Arc::new(ScriptedGenerator("[]".to_string()))),
            GenerationParams::default(),
            100,
        );

        for i in 0..99 {
            store.record(event(&format!("u{}", i % 5), "s1", ActionType::View, i));
        }
        assert!(engine.generate_market_insights().await.is_empty());
    }

    #[tokio::test]
    async fn test_market_insights_generated_and_sorted() {
        let store = Arc::new(BehaviorStore::new(100));
        let response = r#"[
            {"type": "trend", "category": "electronics", "insight": "Rising demand", "impact": "high", "confidence": 0.6, "recommendations": []},
            {"type": "demand", "category": "house", "insight": "Stable demand", "impact": "medium", "confidence": 0.9, "recommendations": []}
        ]"#;
        let engine = InsightEngine::new(
            store.clone(),
            Some(Arc::new(ScriptedGenerator(response.to_string()))),
            GenerationParams::default(),
            100,
        );

        for i in 0..120 {
            store.record(event(&format!("u{}", i % 5), "s1", ActionType::View, i));
        }

        let fresh = engine.generate_market_insights().await;
        assert_eq!(fresh.len(), 2);

        let cached = engine.market_insights(&MarketInsightFilters::default());
        assert_eq!(cached.len(), 2);
        assert!(cached[0].confidence >= cached[1].confidence);
        assert_eq!(cached[0].kind, MarketInsightKind::Demand);

        let filtered = engine.market_insights(&MarketInsightFilters {
            kind: Some(MarketInsightKind::Trend),
            category: None,
        });
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].impact, Impact::High);
    }

    /// Yields each scripted response once, then fails.
    struct SequenceGenerator(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl TextGenerator for SequenceGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> crate::services::generation::Result<Completion> {
            let mut queue = self.0.lock().unwrap();
            if queue.is_empty() {
                return Err(GenerationError::Http("exhausted".to_string()));
            }
            Ok(Completion {
                text: queue.remove(0),
                tokens_used: TokenUsage::default(),
                cost_estimate: 0.0,
            })
        }

        fn name(&self) -> &str {
            "sequence"
        }
    }

    #[tokio::test]
    async fn test_failed_market_regeneration_preserves_cache() {
        let store = Arc::new(BehaviorStore::new(100));
        for i in 0..120 {
            store.record(event(&format!("u{}", i % 5), "s1", ActionType::View, i));
        }

        let generator = SequenceGenerator(std::sync::Mutex::new(vec![
            r#"[{"type": "trend", "insight": "x", "confidence": 0.5, "recommendations": []}]"#
                .to_string(),
        ]));
        let engine = InsightEngine::new(
            store.clone(),
            Some(Arc::new(generator)),
            GenerationParams::default(),
            100,
        );

        engine.generate_market_insights().await;
        assert_eq!(engine.market_insights(&Default::default()).len(), 1);

        // Second cycle fails; the cached set survives
        let empty_cycle = engine.generate_market_insights().await;
        assert!(empty_cycle.is_empty());
        assert_eq!(engine.market_insights(&Default::default()).len(), 1);
    }

    /// Records the parameters of every generate call.
    struct RecordingGenerator(std::sync::Mutex<Vec<GenerationParams>>);

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            params: &GenerationParams,
        ) -> crate::services::generation::Result<Completion> {
            self.0.lock().unwrap().push(params.clone());
            Ok(Completion {
                text: "[]".to_string(),
                tokens_used: TokenUsage::default(),
                cost_estimate: 0.0,
            })
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_configured_params_reach_the_generator() {
        let store = Arc::new(BehaviorStore::new(200));
        let recorder = Arc::new(RecordingGenerator(std::sync::Mutex::new(Vec::new())));
        let params = GenerationParams {
            max_tokens: 4096,
            temperature: 0.9,
            ..Default::default()
        };
        let engine = InsightEngine::new(store.clone(), Some(recorder.clone()), params, 100);

        for i in 0..120 {
            store.record(event("u1", "s1", ActionType::View, i));
        }
        engine.regenerate_user_insights("u1").await;
        engine.generate_market_insights().await;

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for call in seen.iter() {
            assert_eq!(call.max_tokens, 4096);
            assert_eq!(call.temperature, 0.9);
        }
    }
}
