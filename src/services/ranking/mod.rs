// ============================================
// Ranker / Diversifier
// ============================================
//
// Final stage of one recommendation pass: request filters, greedy
// category-diversity re-ranking, score-descending sort, truncation, and
// 1-based rank assignment.

use crate::models::{ItemFeatures, RecommendationRequest, RecommendationResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct Ranker {
    default_limit: usize,
    default_diversity_factor: f32,
    /// Seed for the diversity coin flip; set in tests for determinism.
    rng_seed: Option<u64>,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(50, 0.3)
    }
}

impl Ranker {
    pub fn new(default_limit: usize, default_diversity_factor: f32) -> Self {
        Self {
            default_limit,
            default_diversity_factor,
            rng_seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Apply request filters, diversity re-ranking, final sort and rank
    /// assignment. `items_by_id` is the request-scoped candidate lookup;
    /// results without a backing item are dropped.
    pub fn finalize(
        &self,
        results: Vec<RecommendationResult>,
        items_by_id: &HashMap<String, ItemFeatures>,
        request: &RecommendationRequest,
    ) -> Vec<RecommendationResult> {
        let input_count = results.len();

        let mut filtered: Vec<RecommendationResult> = results
            .into_iter()
            .filter(|r| {
                items_by_id
                    .get(&r.id)
                    .map(|item| passes_filters(item, request))
                    .unwrap_or(false)
            })
            .collect();

        sort_by_score(&mut filtered);

        let diversity_factor = request
            .diversity_factor
            .unwrap_or(self.default_diversity_factor)
            .clamp(0.0, 1.0);
        let mut selected = self.diversify(filtered, diversity_factor, items_by_id);

        sort_by_score(&mut selected);

        let limit = request.limit.unwrap_or(self.default_limit);
        selected.truncate(limit);

        for (i, result) in selected.iter_mut().enumerate() {
            result.rank = (i + 1) as u32;
        }

        debug!(
            input_count,
            final_count = selected.len(),
            diversity_factor,
            "Ranking finalized"
        );
        selected
    }

    /// Greedy pass over score-descending results: accept when the item
    /// brings an unseen category, otherwise with probability
    /// (1 - diversity_factor). factor 0 disables diversity pressure.
    fn diversify(
        &self,
        results: Vec<RecommendationResult>,
        diversity_factor: f32,
        items_by_id: &HashMap<String, ItemFeatures>,
    ) -> Vec<RecommendationResult> {
        let mut rng: StdRng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut seen_categories: HashSet<String> = HashSet::new();
        let mut selected = Vec::with_capacity(results.len());

        for result in results {
            let categories: Vec<String> = items_by_id
                .get(&result.id)
                .map(|item| {
                    item.categories
                        .iter()
                        .map(|c| c.to_lowercase())
                        .collect()
                })
                .unwrap_or_default();

            let introduces_new = categories.iter().any(|c| !seen_categories.contains(c));
            let accept = introduces_new || rng.gen::<f32>() < (1.0 - diversity_factor);

            if accept {
                seen_categories.extend(categories);
                selected.push(result);
            }
        }

        selected
    }
}

fn sort_by_score(results: &mut [RecommendationResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn passes_filters(item: &ItemFeatures, request: &RecommendationRequest) -> bool {
    let filters = &request.filters;

    if let Some(categories) = &filters.categories {
        if !categories.is_empty() {
            let matched = item
                .categories
                .iter()
                .any(|c| categories.iter().any(|f| f.eq_ignore_ascii_case(c)));
            if !matched {
                return false;
            }
        }
    }

    if let Some(range) = &filters.price_range {
        match item.price {
            Some(price) if price >= range.min && price <= range.max => {}
            _ => return false,
        }
    }

    if let Some(min_rating) = filters.min_rating {
        if item.rating.unwrap_or(0.0) < min_rating {
            return false;
        }
    }

    if let Some(location) = &filters.location {
        let wanted = location.to_lowercase();
        match &item.location {
            Some(loc) if loc.to_lowercase().contains(&wanted) => {}
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, PriceRange, RecommendationFilters};

    fn item(id: &str, category: &str, price: f64, rating: f32) -> ItemFeatures {
        ItemFeatures {
            id: id.to_string(),
            item_type: EntityType::Listing,
            feature_vector: vec![],
            categories: vec![category.to_string()],
            location: Some("Berlin".to_string()),
            rating: Some(rating),
            price: Some(price),
            popularity: None,
            recency: None,
            description: None,
        }
    }

    fn result(id: &str, score: f32) -> RecommendationResult {
        RecommendationResult {
            id: id.to_string(),
            item_type: EntityType::Listing,
            score,
            confidence: 0.8,
            reasons: vec![],
            metadata: Default::default(),
            rank: 0,
        }
    }

    fn request() -> RecommendationRequest {
        RecommendationRequest {
            user_id: "u1".to_string(),
            entity_type: EntityType::Listing,
            context: Default::default(),
            filters: Default::default(),
            limit: None,
            diversity_factor: None,
        }
    }

    fn lookup(items: &[ItemFeatures]) -> HashMap<String, ItemFeatures> {
        items.iter().map(|i| (i.id.clone(), i.clone())).collect()
    }

    #[test]
    fn test_ranks_contiguous_from_one() {
        let items = vec![
            item("a", "apartment", 1000.0, 4.0),
            item("b", "house", 1500.0, 4.5),
            item("c", "villa", 2000.0, 3.5),
        ];
        let results = vec![result("a", 0.5), result("b", 0.9), result("c", 0.7)];

        let ranker = Ranker::default().with_seed(7);
        let finalized = ranker.finalize(results, &lookup(&items), &request());

        let ranks: Vec<u32> = finalized.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=finalized.len() as u32).collect::<Vec<_>>());
        assert_eq!(finalized[0].id, "b");
    }

    #[test]
    fn test_diversity_factor_zero_is_pure_score_order() {
        // Three of five candidates share one category and score highest
        let items = vec![
            item("a", "apartment", 1000.0, 4.0),
            item("b", "apartment", 1000.0, 4.0),
            item("c", "apartment", 1000.0, 4.0),
            item("d", "house", 1000.0, 4.0),
            item("e", "villa", 1000.0, 4.0),
        ];
        let results = vec![
            result("a", 0.95),
            result("b", 0.9),
            result("c", 0.85),
            result("d", 0.5),
            result("e", 0.4),
        ];

        let mut req = request();
        req.diversity_factor = Some(0.0);

        let ranker = Ranker::default().with_seed(42);
        let finalized = ranker.finalize(results, &lookup(&items), &req);

        let ids: Vec<&str> = finalized.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_full_diversity_keeps_new_categories() {
        let items = vec![
            item("a", "apartment", 1000.0, 4.0),
            item("b", "apartment", 1000.0, 4.0),
            item("c", "house", 1000.0, 4.0),
        ];
        let results = vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)];

        let mut req = request();
        req.diversity_factor = Some(1.0); // repeats never accepted by coin flip

        let ranker = Ranker::default().with_seed(1);
        let finalized = ranker.finalize(results, &lookup(&items), &req);

        let ids: Vec<&str> = finalized.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_category_filter_drops_non_matching() {
        let items = vec![
            item("a", "apartment", 1000.0, 4.0),
            item("b", "house", 1000.0, 4.0),
        ];
        let results = vec![result("a", 0.9), result("b", 0.8)];

        let mut req = request();
        req.filters = RecommendationFilters {
            categories: Some(vec!["house".to_string()]),
            ..Default::default()
        };

        let ranker = Ranker::default().with_seed(3);
        let finalized = ranker.finalize(results, &lookup(&items), &req);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].id, "b");
        assert_eq!(finalized[0].rank, 1);
    }

    #[test]
    fn test_price_and_rating_filters() {
        let items = vec![
            item("cheap", "apartment", 400.0, 4.8),
            item("mid", "house", 1200.0, 3.0),
            item("good", "villa", 1500.0, 4.6),
        ];
        let results = vec![
            result("cheap", 0.9),
            result("mid", 0.8),
            result("good", 0.7),
        ];

        let mut req = request();
        req.filters = RecommendationFilters {
            price_range: Some(PriceRange {
                min: 1000.0,
                max: 2000.0,
                currency: "EUR".to_string(),
            }),
            min_rating: Some(4.0),
            ..Default::default()
        };

        let ranker = Ranker::default().with_seed(3);
        let finalized = ranker.finalize(results, &lookup(&items), &req);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].id, "good");
    }

    #[test]
    fn test_limit_truncation() {
        let items: Vec<ItemFeatures> = (0..10)
            .map(|i| item(&format!("i{i}"), &format!("cat{i}"), 1000.0, 4.0))
            .collect();
        let results: Vec<RecommendationResult> = (0..10)
            .map(|i| result(&format!("i{i}"), 1.0 - i as f32 * 0.05))
            .collect();

        let mut req = request();
        req.limit = Some(3);

        let ranker = Ranker::default().with_seed(9);
        let finalized = ranker.finalize(results, &lookup(&items), &req);
        assert_eq!(finalized.len(), 3);
        assert_eq!(
            finalized.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_missing_item_lookup_dropped() {
        let items = vec![item("a", "apartment", 1000.0, 4.0)];
        let results = vec![result("a", 0.9), result("ghost", 0.95)];

        let ranker = Ranker::default().with_seed(3);
        let finalized = ranker.finalize(results, &lookup(&items), &request());
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].id, "a");
    }
}
