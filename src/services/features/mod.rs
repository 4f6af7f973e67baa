// ============================================
// Feature Extraction
// ============================================
//
// Encodes user preferences + behavior history and catalog items into
// fixed-layout vectors sharing one dimensionality, so the two spaces are
// directly comparable via cosine similarity.
//
// Layout: [category one-hot (C), price scalar (1), location one-hot (L),
// tail (5)]. The user tail carries view/click/book/purchase frequency
// ratios plus a recency decay scalar; the item tail carries quality,
// popularity and recency with two zero placeholders.

use crate::models::{ActionType, BehaviorEvent, ItemFeatures, UserPreferences, UserProfile};
use chrono::{Duration, Utc};
use tracing::debug;

/// Fixed top categories used for one-hot encoding.
pub const TOP_CATEGORIES: [&str; 10] = [
    "apartment",
    "house",
    "villa",
    "studio",
    "room",
    "office",
    "commercial",
    "land",
    "parking",
    "storage",
];

/// Fixed top locations used for one-hot encoding.
pub const TOP_LOCATIONS: [&str; 8] = [
    "london",
    "paris",
    "berlin",
    "madrid",
    "rome",
    "amsterdam",
    "lisbon",
    "vienna",
];

/// Shared vector dimensionality for user and item encodings.
pub const FEATURE_DIM: usize = TOP_CATEGORIES.len() + 1 + TOP_LOCATIONS.len() + 5;

/// Price normalization ceiling for the log-scaled price scalar.
const PRICE_CAP: f64 = 1_000_000.0;

pub struct FeatureExtractor {
    /// Profile staleness window in hours
    profile_ttl_hours: i64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(24)
    }
}

impl FeatureExtractor {
    pub fn new(profile_ttl_hours: i64) -> Self {
        Self { profile_ttl_hours }
    }

    /// Build a user profile from stated preferences and behavior history.
    ///
    /// Rebuilding is idempotent: identical inputs on the same day produce
    /// an identical feature vector (only `last_updated` moves).
    pub fn build_profile(
        &self,
        user_id: &str,
        behaviors: &[BehaviorEvent],
        preferences: &UserPreferences,
    ) -> UserProfile {
        let mut vector = Vec::with_capacity(FEATURE_DIM);

        // Category one-hot against preferred categories
        for cat in TOP_CATEGORIES {
            let member = preferences
                .categories
                .iter()
                .any(|c| c.to_lowercase() == cat);
            vector.push(if member { 1.0 } else { 0.0 });
        }

        // Log-scaled price ceiling
        let price_ceiling = preferences.price_range.as_ref().map(|r| r.max).unwrap_or(0.0);
        vector.push(normalize_price(price_ceiling));

        // Location one-hot against preferred locations
        for loc in TOP_LOCATIONS {
            let member = preferences
                .locations
                .iter()
                .any(|l| l.to_lowercase().contains(loc));
            vector.push(if member { 1.0 } else { 0.0 });
        }

        // Per-action frequency ratios
        let total = behaviors.len() as f32;
        for action in [
            ActionType::View,
            ActionType::Click,
            ActionType::Book,
            ActionType::Purchase,
        ] {
            let count = behaviors.iter().filter(|b| b.action == action).count() as f32;
            vector.push(if total > 0.0 { count / total } else { 0.0 });
        }

        // Recency decay: exp(-days_since_last_activity / 30), whole days
        let recency = behaviors
            .iter()
            .map(|b| b.timestamp)
            .max()
            .map(|last| {
                let days = (Utc::now() - last).num_days().max(0) as f32;
                (-days / 30.0).exp()
            })
            .unwrap_or(0.0);
        vector.push(recency);

        debug_assert_eq!(vector.len(), FEATURE_DIM);

        let segments = derive_segments(behaviors);

        debug!(
            user_id = user_id,
            behavior_count = behaviors.len(),
            segments = ?segments,
            "Profile built"
        );

        UserProfile {
            user_id: user_id.to_string(),
            feature_vector: vector,
            preferences: preferences.clone(),
            segments,
            last_updated: Utc::now(),
        }
    }

    /// A profile older than the staleness window must be rebuilt.
    pub fn is_stale(&self, profile: &UserProfile) -> bool {
        Utc::now() - profile.last_updated > Duration::hours(self.profile_ttl_hours)
    }

    /// Encode a catalog item into the shared vector space.
    ///
    /// Used when the catalog does not supply a pre-computed vector.
    pub fn item_vector(&self, item: &ItemFeatures) -> Vec<f32> {
        let mut vector = Vec::with_capacity(FEATURE_DIM);

        for cat in TOP_CATEGORIES {
            let member = item.categories.iter().any(|c| c.to_lowercase() == cat);
            vector.push(if member { 1.0 } else { 0.0 });
        }

        vector.push(normalize_price(item.price.unwrap_or(0.0)));

        let item_location = item
            .location
            .as_deref()
            .map(|l| l.to_lowercase())
            .unwrap_or_default();
        for loc in TOP_LOCATIONS {
            vector.push(if item_location.contains(loc) { 1.0 } else { 0.0 });
        }

        // Tail: quality, popularity, recency, placeholders
        vector.push(item.rating.unwrap_or(0.0) / 5.0);
        vector.push(item.popularity.unwrap_or(0.0));
        vector.push(item.recency.unwrap_or(0.0));
        vector.push(0.0);
        vector.push(0.0);

        debug_assert_eq!(vector.len(), FEATURE_DIM);
        vector
    }
}

fn normalize_price(price: f64) -> f32 {
    if price <= 0.0 {
        return 0.0;
    }
    let scaled = (1.0 + price).ln() / (1.0 + PRICE_CAP).ln();
    scaled.clamp(0.0, 1.0) as f32
}

fn derive_segments(behaviors: &[BehaviorEvent]) -> Vec<String> {
    let mut segments = Vec::new();
    if behaviors.iter().any(|b| b.action.is_conversion()) {
        segments.push("converter".to_string());
    }
    if behaviors.len() > 50 {
        segments.push("high_engagement".to_string());
    }
    if segments.is_empty() {
        segments.push("browser".to_string());
    }
    segments
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 on dimensionality mismatch or when either vector has zero
/// magnitude; this is a data-shape condition, not an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
