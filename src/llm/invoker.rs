//! Uniform model invocation with provider routing and rate-limit backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

use super::client::{AnthropicClient, ClientConfig, GoogleClient, OpenAiCompatClient, ProviderClient};
use super::types::{ChatMessage, CompletionRequest, ModelRef, Provider};

/// Retry policy applied uniformly to every invocation, regardless of provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum rate-limit retries before the terminal error surfaces
    pub max_retries: u32,
    /// Base backoff after a rate-limit signal
    pub rate_limit_delay: Duration,
    /// Additional backoff added per attempt
    pub rate_limit_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            rate_limit_delay: Duration::from_secs(10),
            rate_limit_step: Duration::from_secs(5),
        }
    }
}

/// Routes prompts to the registered client for a model's provider and
/// enforces the shared retry/backoff policy.
///
/// Invocations are independent: the invoker holds no mutable state, so
/// concurrent calls need no coordination beyond standard connection reuse
/// inside each client.
pub struct ModelInvoker {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    retry: RetryPolicy,
    system_prompt: Option<String>,
    max_tokens: u32,
    temperature: f64,
}

impl ModelInvoker {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            clients: HashMap::new(),
            retry,
            system_prompt: None,
            max_tokens: 2000,
            temperature: 0.3,
        }
    }

    /// Register a client for its provider.
    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    /// System prompt sent with every invocation.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Build an invoker with clients for every provider whose API key is set
    /// in the environment, using `timeout_secs` per attempt.
    ///
    /// Providers without a key are skipped; `ensure_routable` later reports
    /// the ones a run actually needs.
    pub fn from_env(providers: &[Provider], timeout_secs: u64, retry: RetryPolicy) -> Result<Self> {
        let mut invoker = Self::new(retry);
        for &provider in providers {
            let config = match ClientConfig::from_env(provider) {
                Ok(c) => c.with_timeout(timeout_secs),
                Err(e) => {
                    debug!(%provider, "skipping provider: {e}");
                    continue;
                }
            };
            let client: Arc<dyn ProviderClient> = match provider {
                Provider::OpenAI => Arc::new(OpenAiCompatClient::openai(config)?),
                Provider::Groq => Arc::new(OpenAiCompatClient::groq(config)?),
                Provider::OpenRouter => Arc::new(OpenAiCompatClient::openrouter(config)?),
                Provider::Anthropic => Arc::new(AnthropicClient::new(config)?),
                Provider::Google => Arc::new(GoogleClient::new(config)?),
            };
            invoker.clients.insert(provider, client);
        }
        Ok(invoker)
    }

    /// Fail fast when any referenced model has no reachable backend.
    pub fn ensure_routable(&self, models: &[ModelRef]) -> Result<()> {
        for model in models {
            if !self.clients.contains_key(&model.provider) {
                return Err(Error::config(format!(
                    "no client registered for provider {} (required by {model})",
                    model.provider
                )));
            }
        }
        Ok(())
    }

    /// Send `prompt` to `model` and return the raw reply text.
    ///
    /// Rate limits are retried here with the configured backoff, up to the
    /// cap; every other transport error surfaces to the caller, whose
    /// one-retry-per-call-site policy is stage-level and uniform.
    #[instrument(skip(self, prompt), fields(model = %model))]
    pub async fn invoke(&self, model: &ModelRef, prompt: &str) -> Result<String> {
        let client = self.clients.get(&model.provider).ok_or_else(|| {
            Error::config(format!("no client registered for provider {}", model.provider))
        })?;

        let mut request = CompletionRequest::new(&model.name)
            .with_message(ChatMessage::user(prompt))
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        if let Some(system) = &self.system_prompt {
            request = request.with_system(system.clone());
        }

        let mut attempt = 0u32;
        loop {
            match client.send_prompt(request.clone()).await {
                Ok(response) => {
                    debug!(
                        tokens = response.usage.total(),
                        "model replied ({} bytes)",
                        response.content.len()
                    );
                    return Ok(response.content);
                }
                Err(e) if e.is_rate_limit() && attempt < self.retry.max_retries => {
                    let delay =
                        self.retry.rate_limit_delay + self.retry.rate_limit_step * attempt;
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry.max_retries,
                        "rate limited, backing off {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
