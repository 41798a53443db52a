//! Provider client trait and wire implementations.
//!
//! Each provider variant differs only in request/response translation.
//! Retry and timeout policy live in [`crate::llm::invoker::ModelInvoker`],
//! never here.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{ChatRole, CompletionRequest, CompletionResponse, Provider, TokenUsage};

/// The single capability every backend must provide: send a prompt, get text.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send a completion request and return the model's reply.
    async fn send_prompt(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// The provider this client talks to.
    fn provider(&self) -> Provider;
}

/// Configuration for a provider client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    /// Read the API key for `provider` from its conventional environment
    /// variable (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, ...).
    pub fn from_env(provider: Provider) -> Result<Self> {
        let var = api_key_env(provider);
        let key = env::var(var)
            .map_err(|_| Error::config(format!("{var} is not set for provider {provider}")))?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Environment variable holding the API key for a provider.
pub fn api_key_env(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Google => "GOOGLE_API_KEY",
        Provider::Groq => "GROQ_API_KEY",
        Provider::OpenRouter => "OPENROUTER_API_KEY",
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}

/// Classify a reqwest transport failure into the error taxonomy.
fn classify_transport(provider: Provider, timeout_ms: u64, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(timeout_ms)
    } else {
        Error::Network(format!("{provider}: {err}"))
    }
}

/// Classify a non-success HTTP status into the error taxonomy.
fn classify_status(provider: Provider, status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::auth(provider.to_string(), truncate(body, 200))
        }
        StatusCode::TOO_MANY_REQUESTS => Error::rate_limited(provider.to_string()),
        _ => Error::provider(provider.to_string(), format!("{status}: {}", truncate(body, 200))),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible wire (OpenAI, Groq, OpenRouter)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Client for providers speaking the OpenAI chat-completions wire format.
///
/// OpenAI, Groq, and OpenRouter all serve this shape; only the base URL and
/// the provider tag differ.
pub struct OpenAiCompatClient {
    provider: Provider,
    config: ClientConfig,
    http: Client,
}

impl OpenAiCompatClient {
    pub fn openai(config: ClientConfig) -> Result<Self> {
        Self::new(Provider::OpenAI, "https://api.openai.com", config)
    }

    pub fn groq(config: ClientConfig) -> Result<Self> {
        Self::new(Provider::Groq, "https://api.groq.com/openai", config)
    }

    pub fn openrouter(config: ClientConfig) -> Result<Self> {
        Self::new(Provider::OpenRouter, "https://openrouter.ai/api", config)
    }

    fn new(provider: Provider, default_base: &str, config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        let mut config = config;
        if config.base_url.is_none() {
            config.base_url = Some(default_base.to_string());
        }
        Ok(Self {
            provider,
            config,
            http,
        })
    }

    fn base_url(&self) -> &str {
        // Always populated in new()
        self.config.base_url.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    async fn send_prompt(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for m in &request.messages {
            messages.push(OpenAiMessage {
                role: match m.role {
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                    ChatRole::System => "system".to_string(),
                },
                content: m.content.clone(),
            });
        }

        let api_request = OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());
        let timeout_ms = self.config.timeout_secs * 1000;

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| classify_transport(self.provider, timeout_ms, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(self.provider, timeout_ms, e))?;

        if !status.is_success() {
            return Err(classify_status(self.provider, status, &body));
        }

        let api_response: OpenAiResponse = serde_json::from_str(&body).map_err(|e| {
            Error::provider(self.provider.to_string(), format!("unreadable response: {e}"))
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(self.provider.to_string(), "no choices in response"))?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            model: api_response.model,
            content: choice.message.content,
            usage,
            timestamp: Utc::now(),
        })
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn send_prompt(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let messages: Vec<OpenAiMessage> = request
            .messages
            .iter()
            .map(|m| OpenAiMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant".to_string(),
                    // System content is carried in the dedicated field
                    ChatRole::User | ChatRole::System => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let api_request = AnthropicRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(2000),
            system: request.system,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url());
        let timeout_ms = self.config.timeout_secs * 1000;

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| classify_transport(Provider::Anthropic, timeout_ms, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(Provider::Anthropic, timeout_ms, e))?;

        if !status.is_success() {
            return Err(classify_status(Provider::Anthropic, status, &body));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider("anthropic", format!("unreadable response: {e}")))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            model: api_response.model,
            content,
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
            timestamp: Utc::now(),
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

// ---------------------------------------------------------------------------
// Google Gemini
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: Option<u64>,
}

/// Google Gemini client.
pub struct GoogleClient {
    config: ClientConfig,
    http: Client,
}

impl GoogleClient {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl ProviderClient for GoogleClient {
    async fn send_prompt(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let contents: Vec<GeminiContent> = request
            .messages
            .iter()
            .map(|m| GeminiContent {
                role: match m.role {
                    ChatRole::Assistant => "model".to_string(),
                    ChatRole::User | ChatRole::System => "user".to_string(),
                },
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let system_instruction = request.system.map(|s| GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart { text: s }],
        });

        let api_request = GeminiRequest {
            contents,
            system_instruction,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            }),
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url(),
            request.model,
            self.config.api_key
        );
        let timeout_ms = self.config.timeout_secs * 1000;

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| classify_transport(Provider::Google, timeout_ms, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(Provider::Google, timeout_ms, e))?;

        if !status.is_success() {
            return Err(classify_status(Provider::Google, status, &body));
        }

        let api_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider("google", format!("unreadable response: {e}")))?;

        let candidate = api_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("google", "no candidates in response"))?;

        let content = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = api_response
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            model: request.model,
            content,
            usage,
            timestamp: Utc::now(),
        })
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }
}
