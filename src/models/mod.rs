use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================
// Behavior events
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    View,
    Search,
    Click,
    Bookmark,
    Share,
    Contact,
    Book,
    Purchase,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::View => "view",
            ActionType::Search => "search",
            ActionType::Click => "click",
            ActionType::Bookmark => "bookmark",
            ActionType::Share => "share",
            ActionType::Contact => "contact",
            ActionType::Book => "book",
            ActionType::Purchase => "purchase",
        }
    }

    /// High-intent actions that trigger synchronous insight regeneration
    /// and mark a session as converted.
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            ActionType::Book | ActionType::Purchase | ActionType::Contact
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Listing,
    Service,
    Agency,
    User,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Listing => "listing",
            EntityType::Service => "service",
            EntityType::Agency => "agency",
            EntityType::User => "user",
        }
    }
}

/// Event metadata with schema-known fields plus an open extension bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// A single timestamped user interaction. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub user_id: String,
    pub action: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// May arrive empty or absent; ingestion synthesizes an id so every
    /// stored event belongs to a session
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub metadata: EventMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================
// User profile
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
    pub locations: Vec<String>,
    pub languages: Vec<String>,
    pub notifications_enabled: bool,
    pub privacy_opt_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub feature_vector: Vec<f32>,
    pub preferences: UserPreferences,
    pub segments: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

// ============================================
// Candidate items
// ============================================

/// Candidate item supplied by the catalog collaborator for one scoring
/// pass. `feature_vector` may be empty, in which case the extractor
/// derives one from the attribute fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFeatures {
    pub id: String,
    pub item_type: EntityType,
    #[serde(default)]
    pub feature_vector: Vec<f32>,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================
// Recommendation request/response
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub context: RecommendationContext,
    #[serde(default)]
    pub filters: RecommendationFilters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_factor: Option<f32>,
}

/// Scored candidate. `rank` is 0 until the ranker assigns 1..N in final
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub id: String,
    pub item_type: EntityType,
    pub score: f32,
    pub confidence: f32,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: String,
    pub request_id: Uuid,
    pub results: Vec<RecommendationResult>,
    pub total_results: usize,
    pub algorithm: String,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

// ============================================
// Insights
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserInsightKind {
    Preference,
    Behavior,
    Prediction,
    Segment,
}

impl UserInsightKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "preference" => UserInsightKind::Preference,
            "prediction" => UserInsightKind::Prediction,
            "segment" => UserInsightKind::Segment,
            _ => UserInsightKind::Behavior,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInsight {
    pub user_id: String,
    pub kind: UserInsightKind,
    pub insight: String,
    pub confidence: f32,
    pub evidence: Vec<String>,
    pub actionable: bool,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketInsightKind {
    Trend,
    Demand,
    Pricing,
    Competition,
    Opportunity,
}

impl MarketInsightKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "demand" => MarketInsightKind::Demand,
            "pricing" => MarketInsightKind::Pricing,
            "competition" => MarketInsightKind::Competition,
            "opportunity" => MarketInsightKind::Opportunity,
            _ => MarketInsightKind::Trend,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

impl Impact {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => Impact::High,
            "low" => Impact::Low,
            _ => Impact::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInsight {
    pub id: Uuid,
    pub kind: MarketInsightKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub insight: String,
    pub impact: Impact,
    pub confidence: f32,
    pub data: serde_json::Value,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Query filters for the market insight cache.
#[derive(Debug, Clone, Default)]
pub struct MarketInsightFilters {
    pub kind: Option<MarketInsightKind>,
    pub category: Option<String>,
}

// ============================================
// Time buckets
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeBucket {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeBucket::Morning,
            12..=17 => TimeBucket::Afternoon,
            18..=21 => TimeBucket::Evening,
            _ => TimeBucket::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Morning => "morning",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
            TimeBucket::Night => "night",
        }
    }
}
