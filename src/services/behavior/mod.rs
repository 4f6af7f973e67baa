// ============================================
// Behavior Store & Pattern Extraction
// ============================================
//
// Append-only per-user buffers of interaction events plus the statistical
// pattern extraction that feeds insight generation:
// - action / category / location frequency maps
// - time-of-day bucket counts
// - session reconstruction with duration, action count, conversion flag

use crate::models::{ActionType, BehaviorEvent, TimeBucket};
use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// In-process keyed store of per-user behavior buffers.
///
/// DashMap entry locks serialize concurrent writers for the same user;
/// different users append without contention. Reads clone a snapshot so
/// extraction never blocks ingestion.
pub struct BehaviorStore {
    buffers: DashMap<String, Vec<BehaviorEvent>>,
    max_events_per_user: usize,
}

impl BehaviorStore {
    pub fn new(max_events_per_user: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            max_events_per_user,
        }
    }

    /// Append an event to the user's buffer. Never fails.
    ///
    /// Returns true when the action is a conversion, so the caller can
    /// trigger synchronous insight regeneration.
    pub fn record(&self, event: BehaviorEvent) -> bool {
        let is_conversion = event.action.is_conversion();
        let user_id = event.user_id.clone();

        let mut buffer = self.buffers.entry(user_id.clone()).or_default();
        buffer.push(event);
        if buffer.len() > self.max_events_per_user {
            let excess = buffer.len() - self.max_events_per_user;
            buffer.drain(..excess);
        }

        debug!(
            user_id = %user_id,
            buffer_len = buffer.len(),
            "Behavior recorded"
        );
        is_conversion
    }

    /// Snapshot of a user's buffered events (oldest first).
    pub fn events_for(&self, user_id: &str) -> Vec<BehaviorEvent> {
        self.buffers
            .get(user_id)
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.buffers.iter().map(|e| e.key().clone()).collect()
    }

    /// Total buffered events across all users.
    pub fn total_events(&self) -> usize {
        self.buffers.iter().map(|e| e.value().len()).sum()
    }

    /// Snapshot of every buffered event, for market-level aggregation.
    pub fn all_events(&self) -> Vec<BehaviorEvent> {
        self.buffers
            .iter()
            .flat_map(|e| e.value().clone())
            .collect()
    }

    /// Trim every buffer to its most recent `max` events.
    pub fn trim_all(&self, max: usize) {
        for mut entry in self.buffers.iter_mut() {
            let buffer = entry.value_mut();
            if buffer.len() > max {
                let excess = buffer.len() - max;
                buffer.drain(..excess);
            }
        }
    }
}

// ============================================
// Pattern extraction
// ============================================

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub session_id: String,
    pub duration_secs: i64,
    pub action_count: usize,
    pub converted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BehaviorPatterns {
    pub action_frequency: HashMap<ActionType, usize>,
    pub category_preferences: HashMap<String, usize>,
    pub time_buckets: HashMap<TimeBucket, usize>,
    pub location_frequency: HashMap<String, usize>,
    pub sessions: Vec<SessionMetrics>,
    pub avg_session_duration_secs: f64,
    pub avg_actions_per_session: f64,
    pub conversion_rate: f64,
}

/// Extract statistical patterns from a slice of behavior events.
pub fn extract_patterns(behaviors: &[BehaviorEvent]) -> BehaviorPatterns {
    let mut patterns = BehaviorPatterns::default();

    let mut session_events: HashMap<&str, Vec<&BehaviorEvent>> = HashMap::new();

    for event in behaviors {
        *patterns.action_frequency.entry(event.action).or_insert(0) += 1;

        if let Some(category) = &event.metadata.category {
            *patterns
                .category_preferences
                .entry(category.clone())
                .or_insert(0) += 1;
        }

        // Buckets use the UTC hour; events carry no timezone, so UTC is
        // the deterministic choice even when a geo location is present
        let bucket = TimeBucket::from_hour(event.timestamp.hour());
        *patterns.time_buckets.entry(bucket).or_insert(0) += 1;

        // Metadata location first, geo city as fallback
        let location = event
            .metadata
            .location
            .clone()
            .or_else(|| event.location.as_ref().and_then(|g| g.city.clone()));
        if let Some(location) = location {
            *patterns.location_frequency.entry(location).or_insert(0) += 1;
        }

        session_events
            .entry(event.session_id.as_str())
            .or_default()
            .push(event);
    }

    for (session_id, events) in session_events {
        let timestamps: Vec<DateTime<Utc>> = events.iter().map(|e| e.timestamp).collect();
        let min_ts = timestamps.iter().min().copied().unwrap_or_else(Utc::now);
        let max_ts = timestamps.iter().max().copied().unwrap_or_else(Utc::now);

        patterns.sessions.push(SessionMetrics {
            session_id: session_id.to_string(),
            duration_secs: (max_ts - min_ts).num_seconds(),
            action_count: events.len(),
            converted: events.iter().any(|e| e.action.is_conversion()),
        });
    }

    let session_count = patterns.sessions.len();
    if session_count > 0 {
        patterns.avg_session_duration_secs = patterns
            .sessions
            .iter()
            .map(|s| s.duration_secs as f64)
            .sum::<f64>()
            / session_count as f64;
        patterns.avg_actions_per_session = patterns
            .sessions
            .iter()
            .map(|s| s.action_count as f64)
            .sum::<f64>()
            / session_count as f64;
        let converted = patterns.sessions.iter().filter(|s| s.converted).count();
        patterns.conversion_rate = converted as f64 / session_count as f64;
    }

    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, EventMetadata};
    use chrono::{Duration, TimeZone};

    fn event(user: &str, session: &str, action: ActionType, ts_offset_secs: i64) -> BehaviorEvent {
        BehaviorEvent {
            user_id: user.to_string(),
            action,
            entity_type: EntityType::Listing,
            entity_id: "e1".to_string(),
            session_id: session.to_string(),
            metadata: EventMetadata {
                category: Some("apartment".to_string()),
                ..Default::default()
            },
            location: None,
            device: None,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap()
                + Duration::seconds(ts_offset_secs),
        }
    }

    #[test]
    fn test_record_and_snapshot() {
        let store = BehaviorStore::new(100);
        assert!(!store.record(event("u1", "s1", ActionType::View, 0)));
        assert!(store.record(event("u1", "s1", ActionType::Book, 10)));

        let events = store.events_for("u1");
        assert_eq!(events.len(), 2);
        assert_eq!(store.total_events(), 2);
        assert!(store.events_for("unknown").is_empty());
    }

    #[test]
    fn test_buffer_evicts_oldest_first() {
        let store = BehaviorStore::new(3);
        for i in 0..5 {
            store.record(event("u1", "s1", ActionType::View, i));
        }
        let events = store.events_for("u1");
        assert_eq!(events.len(), 3);
        // The two oldest were evicted
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 2).unwrap()
        );
    }

    #[test]
    fn test_trim_all() {
        let store = BehaviorStore::new(1000);
        for i in 0..10 {
            store.record(event("u1", "s1", ActionType::View, i));
        }
        store.trim_all(4);
        assert_eq!(store.events_for("u1").len(), 4);
    }

    #[test]
    fn test_record_reflected_in_patterns() {
        let store = BehaviorStore::new(100);
        store.record(event("u1", "s1", ActionType::View, 0));
        let before = extract_patterns(&store.events_for("u1"));

        store.record(event("u1", "s1", ActionType::Click, 5));
        let after = extract_patterns(&store.events_for("u1"));

        let clicks_before = before
            .action_frequency
            .get(&ActionType::Click)
            .copied()
            .unwrap_or(0);
        let clicks_after = after
            .action_frequency
            .get(&ActionType::Click)
            .copied()
            .unwrap_or(0);
        assert_eq!(clicks_after, clicks_before + 1);
    }

    #[test]
    fn test_session_metrics() {
        let events = vec![
            event("u1", "s1", ActionType::View, 0),
            event("u1", "s1", ActionType::Click, 60),
            event("u1", "s1", ActionType::Book, 120),
            event("u1", "s2", ActionType::View, 300),
        ];
        let patterns = extract_patterns(&events);

        assert_eq!(patterns.sessions.len(), 2);
        let s1 = patterns
            .sessions
            .iter()
            .find(|s| s.session_id == "s1")
            .unwrap();
        assert_eq!(s1.duration_secs, 120);
        assert_eq!(s1.action_count, 3);
        assert!(s1.converted);
        assert_eq!(patterns.conversion_rate, 0.5);
        assert_eq!(patterns.avg_actions_per_session, 2.0);
    }

    #[test]
    fn test_conversion_rate_zero_sessions() {
        let patterns = extract_patterns(&[]);
        assert_eq!(patterns.conversion_rate, 0.0);
        assert_eq!(patterns.avg_session_duration_secs, 0.0);
    }

    #[test]
    fn test_conversion_rate_all_converted() {
        let events = vec![
            event("u1", "s1", ActionType::Purchase, 0),
            event("u1", "s2", ActionType::Contact, 100),
        ];
        let patterns = extract_patterns(&events);
        assert_eq!(patterns.conversion_rate, 1.0);
    }

    #[test]
    fn test_time_buckets_and_categories() {
        // 14:00 UTC is afternoon
        let events = vec![
            event("u1", "s1", ActionType::View, 0),
            event("u1", "s1", ActionType::View, 1),
        ];
        let patterns = extract_patterns(&events);
        assert_eq!(
            patterns.time_buckets.get(&TimeBucket::Afternoon).copied(),
            Some(2)
        );
        assert_eq!(
            patterns.category_preferences.get("apartment").copied(),
            Some(2)
        );
    }

    #[test]
    fn test_time_bucket_ignores_geo_location() {
        // 22:00 UTC is night regardless of where the event originated
        let mut e = event("u1", "s1", ActionType::View, 0);
        e.timestamp = Utc.with_ymd_and_hms(2026, 3, 10, 22, 0, 0).unwrap();
        e.location = Some(crate::models::GeoLocation {
            lat: 40.4,
            lon: -3.7,
            city: Some("Madrid".to_string()),
            country: Some("ES".to_string()),
        });
        let patterns = extract_patterns(&[e]);
        assert_eq!(patterns.time_buckets.get(&TimeBucket::Night).copied(), Some(1));
    }
}
