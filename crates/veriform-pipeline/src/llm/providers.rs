//! LLM API providers.
//!
//! Concrete completion backends behind cargo features: `anthropic`, `openai`,
//! and `local` (any OpenAI-compatible endpoint such as vLLM or Ollama). The
//! reqwest client carries its own timeout in addition to the pipeline's
//! per-call bound.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{CompletionProvider, CompletionRequest, LlmError, Role};

// ============================================================================
// Configuration
// ============================================================================

/// Provider configuration loaded from the environment or built explicitly.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Local,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "no LLM provider configured; set ANTHROPIC_API_KEY, OPENAI_API_KEY, or VERIFORM_LLM_URL"
    )]
    NoProviderConfigured,
}

impl LlmConfig {
    /// Load from environment variables, Anthropic first.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
                base_url: None,
                timeout_secs: 60,
            });
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAi,
                api_key: key,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: 60,
            });
        }

        if let Ok(url) = std::env::var("VERIFORM_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: std::env::var("VERIFORM_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
                base_url: Some(url),
                timeout_secs: 120,
            });
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAi,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
        }
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Network(e.to_string()))
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[cfg(any(feature = "openai", feature = "local"))]
fn openai_style_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
    request
        .messages
        .iter()
        .map(|m| serde_json::json!({"role": role_str(m.role), "content": m.content}))
        .collect()
}

// ============================================================================
// Anthropic
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    client: Client,
    config: LlmConfig,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl CompletionProvider for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = "https://api.anthropic.com/v1/messages";

        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": role_str(m.role), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        if response.status() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;
        Ok(data["content"][0]["text"].as_str().unwrap_or("").to_string())
    }
}

// ============================================================================
// OpenAI / local (OpenAI-compatible)
// ============================================================================

#[cfg(any(feature = "openai", feature = "local"))]
pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
}

#[cfg(any(feature = "openai", feature = "local"))]
impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

#[cfg(any(feature = "openai", feature = "local"))]
#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_style_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut req = self
            .client
            .post(self.completions_url())
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = req.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        if response.status() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;
        Ok(data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}

// ============================================================================
// Unified dispatch
// ============================================================================

/// Build the provider named by the configuration. Feature gates decide which
/// arms exist; a config pointing at a compiled-out provider errors cleanly.
pub fn provider_from_config(
    config: LlmConfig,
) -> Result<Box<dyn CompletionProvider>, LlmError> {
    match config.provider {
        #[cfg(feature = "anthropic")]
        Provider::Anthropic => Ok(Box::new(AnthropicClient::new(config)?)),
        #[cfg(any(feature = "openai", feature = "local"))]
        Provider::OpenAi | Provider::Local => Ok(Box::new(OpenAiClient::new(config)?)),
        #[allow(unreachable_patterns)]
        other => Err(LlmError::NotConfigured(format!(
            "provider {other:?} not compiled in; enable the matching cargo feature"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_configs_carry_their_provider() {
        let config = LlmConfig::anthropic("key", "claude-sonnet-4-20250514");
        assert_eq!(config.provider, Provider::Anthropic);
        assert_eq!(config.timeout_secs, 60);

        let config = LlmConfig::local("http://localhost:8000", "llama");
        assert_eq!(config.provider, Provider::Local);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8000"));
    }
}
