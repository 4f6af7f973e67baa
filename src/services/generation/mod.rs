// ============================================
// Text Generation Service
// ============================================
//
// Narrow contract over interchangeable LLM backends: prompt + generation
// parameters in, text completion with token usage and a cost estimate
// out. Callers must tolerate failure; scoring and insight generation
// degrade instead of propagating these errors.
//
// Supported providers: Anthropic Claude, OpenAI.

use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider API error: {0}")]
    Api(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Http(_) | GenerationError::RateLimited(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub metadata: HashMap<String, String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
            metadata: HashMap::new(),
        }
    }
}

impl GenerationParams {
    /// Operator-configured parameters for full-text generation calls.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_used: TokenUsage,
    pub cost_estimate: f64,
}

/// Interchangeable text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Completion>;

    fn name(&self) -> &str;
}

/// Flat per-token cost used for the estimate; providers report usage but
/// pricing is not part of the contract.
const COST_PER_TOKEN: f64 = 0.000_002;

fn classify_status(status: reqwest::StatusCode, body: String) -> GenerationError {
    if status.as_u16() == 429 {
        GenerationError::RateLimited(body)
    } else if status.is_server_error() {
        GenerationError::Http(format!("{}: {}", status, body))
    } else {
        GenerationError::Api(format!("{}: {}", status, body))
    }
}

// ============================================
// Anthropic provider
// ============================================

pub struct AnthropicProvider {
    client: HttpClient,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl TextGenerator for AnthropicProvider {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Completion> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, error_text));
        }

        let result: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let text = result
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| GenerationError::InvalidResponse("empty content".to_string()))?;

        let tokens_used = result
            .usage
            .map(|u| TokenUsage {
                prompt: u.input_tokens,
                completion: u.output_tokens,
                total: u.input_tokens + u.output_tokens,
            })
            .unwrap_or_default();

        Ok(Completion {
            text,
            cost_estimate: tokens_used.total as f64 * COST_PER_TOKEN,
            tokens_used,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================
// OpenAI provider
// ============================================

pub struct OpenAIProvider {
    client: HttpClient,
    api_key: String,
    model: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[async_trait]
impl TextGenerator for OpenAIProvider {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Completion> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, error_text));
        }

        let result: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let text = result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| GenerationError::InvalidResponse("empty choices".to_string()))?;

        let tokens_used = result
            .usage
            .map(|u| TokenUsage {
                prompt: u.prompt_tokens,
                completion: u.completion_tokens,
                total: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(Completion {
            text,
            cost_estimate: tokens_used.total as f64 * COST_PER_TOKEN,
            tokens_used,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Build a provider from config. Returns None when generation is disabled;
/// unknown provider names fall back to Anthropic.
pub fn provider_from_config(config: &LlmConfig) -> Option<Arc<dyn TextGenerator>> {
    if !config.enabled {
        info!("Text generation is disabled");
        return None;
    }

    let provider: Arc<dyn TextGenerator> = match config.provider.as_str() {
        "anthropic" => Arc::new(AnthropicProvider::new(
            &config.api_key,
            &config.model,
            config.request_timeout_secs,
        )),
        "openai" => Arc::new(OpenAIProvider::new(
            &config.api_key,
            &config.model,
            config.request_timeout_secs,
        )),
        other => {
            warn!(provider = other, "Unknown LLM provider, using Anthropic");
            Arc::new(AnthropicProvider::new(
                &config.api_key,
                &config.model,
                config.request_timeout_secs,
            ))
        }
    };

    info!(
        provider = provider.name(),
        model = %config.model,
        "Text generation provider initialized"
    );
    Some(provider)
}

/// Strip markdown code fences from a completion so the JSON body can be
/// decoded with a typed schema.
pub fn extract_json_block(response: &str) -> &str {
    let inner = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response)
    } else {
        response
    };
    inner.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_block_plain() {
        assert_eq!(extract_json_block(r#"[{"a":1}]"#), r#"[{"a":1}]"#);
    }

    #[test]
    fn test_extract_json_block_fenced() {
        let fenced = "Here you go:\n```json\n[{\"a\":1}]\n```\nDone.";
        assert_eq!(extract_json_block(fenced), r#"[{"a":1}]"#);

        let bare_fence = "```\n{\"b\":2}\n```";
        assert_eq!(extract_json_block(bare_fence), r#"{"b":2}"#);
    }

    #[test]
    fn test_params_from_config() {
        let config = LlmConfig {
            enabled: true,
            provider: "anthropic".to_string(),
            api_key: String::new(),
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 4096,
            temperature: 0.9,
            request_timeout_secs: 30,
        };
        let params = GenerationParams::from_config(&config);
        assert_eq!(params.max_tokens, 4096);
        assert_eq!(params.temperature, 0.9);
    }

    #[test]
    fn test_error_retryability() {
        assert!(GenerationError::Http("timeout".to_string()).is_retryable());
        assert!(GenerationError::RateLimited("429".to_string()).is_retryable());
        assert!(!GenerationError::Api("400".to_string()).is_retryable());
        assert!(!GenerationError::InvalidResponse("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_status_classification() {
        let rate = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(rate, GenerationError::RateLimited(_)));

        let server = classify_status(reqwest::StatusCode::BAD_GATEWAY, "".into());
        assert!(matches!(server, GenerationError::Http(_)));

        let client = classify_status(reqwest::StatusCode::BAD_REQUEST, "".into());
        assert!(matches!(client, GenerationError::Api(_)));
    }
}
