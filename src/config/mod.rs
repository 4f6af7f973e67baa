use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum buffered behavior events per user (oldest evicted first)
    pub max_events_per_user: usize,
    /// Profile staleness window in hours
    pub profile_ttl_hours: i64,
    /// Maintenance loop interval in milliseconds
    pub maintenance_interval_ms: u64,
    /// Probability of regenerating market insights on a maintenance tick
    pub market_refresh_probability: f64,
    /// Minimum buffered behaviors (across all users) for market insights
    pub market_min_behaviors: usize,
    /// Default result limit when the request does not set one
    pub default_limit: usize,
    /// Default diversity factor when the request does not set one
    pub default_diversity_factor: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "recommendation-service".to_string()),
            },
            engine: EngineConfig {
                max_events_per_user: env::var("MAX_EVENTS_PER_USER")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("MAX_EVENTS_PER_USER must be a valid usize"),
                profile_ttl_hours: env::var("PROFILE_TTL_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .expect("PROFILE_TTL_HOURS must be a valid i64"),
                maintenance_interval_ms: env::var("MAINTENANCE_INTERVAL_MS")
                    .unwrap_or_else(|_| "300000".to_string())
                    .parse()
                    .expect("MAINTENANCE_INTERVAL_MS must be a valid u64"),
                market_refresh_probability: env::var("MARKET_REFRESH_PROBABILITY")
                    .unwrap_or_else(|_| "0.1".to_string())
                    .parse()
                    .expect("MARKET_REFRESH_PROBABILITY must be a valid f64"),
                market_min_behaviors: env::var("MARKET_MIN_BEHAVIORS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("MARKET_MIN_BEHAVIORS must be a valid usize"),
                default_limit: env::var("DEFAULT_RESULT_LIMIT")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .expect("DEFAULT_RESULT_LIMIT must be a valid usize"),
                default_diversity_factor: env::var("DEFAULT_DIVERSITY_FACTOR")
                    .unwrap_or_else(|_| "0.3".to_string())
                    .parse()
                    .expect("DEFAULT_DIVERSITY_FACTOR must be a valid f32"),
            },
            llm: LlmConfig {
                enabled: env::var("LLM_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .expect("LLM_ENABLED must be true or false"),
                provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "anthropic".to_string()),
                api_key: env::var("LLM_API_KEY").unwrap_or_default(),
                model: env::var("LLM_MODEL")
                    .unwrap_or_else(|_| "claude-3-haiku-20240307".to_string()),
                max_tokens: env::var("LLM_MAX_TOKENS")
                    .unwrap_or_else(|_| "1024".to_string())
                    .parse()
                    .expect("LLM_MAX_TOKENS must be a valid u32"),
                temperature: env::var("LLM_TEMPERATURE")
                    .unwrap_or_else(|_| "0.3".to_string())
                    .parse()
                    .expect("LLM_TEMPERATURE must be a valid f32"),
                request_timeout_secs: env::var("LLM_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("LLM_REQUEST_TIMEOUT_SECS must be a valid u64"),
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events_per_user: 100,
            profile_ttl_hours: 24,
            maintenance_interval_ms: 300_000,
            market_refresh_probability: 0.1,
            market_min_behaviors: 100,
            default_limit: 50,
            default_diversity_factor: 0.3,
        }
    }
}
