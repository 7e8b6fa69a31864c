// timeline-relay-rs/src/providers.rs
//
// HTTP clients for the external LLM providers (OpenAI-compatible API)
//
// Two instances of the same client back the AI endpoints: a primary
// provider for analysis and chat, and a secondary provider that supplies
// optional real-time context. Transient failures are retried with
// exponential backoff; a missing API key degrades to a structured
// NotConfigured error the handlers report instead of crashing.
//
// Configuration (.env file):
// - LLM_API_KEY / LLM_API_URL / LLM_MODEL: primary provider
// - CONTEXT_API_KEY / CONTEXT_API_URL / CONTEXT_MODEL: secondary provider
// - PROVIDER_MAX_RETRIES: Maximum number of retry attempts (default: 3)
// - PROVIDER_INITIAL_RETRY_DELAY_MS: Initial delay between retries (default: 1000)
// - PROVIDER_MAX_RETRY_DELAY_MS: Maximum delay between retries (default: 30000)

use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CONTEXT_API_URL: &str = "https://api.perplexity.ai/chat/completions";
pub const DEFAULT_CONTEXT_MODEL: &str = "sonar";

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No API key configured for this provider.
    #[error("{0} provider is not configured (missing API key)")]
    NotConfigured(String),

    /// 400/401/403/404 - client-side errors that retrying will not fix.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 429 - retried with backoff until the budget runs out.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// 500/502/503/504 - possibly transient, retried.
    #[error("Server error: {0}")]
    Server(String),

    /// Connection issues, timeouts, network failures - retried.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with a body we could not use.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Server(_) | ProviderError::Network(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    name: String,
    http: Client,
    api_key: String,
    api_url: String,
    model: String,
    max_retries: u32,
    initial_retry_delay_ms: u64,
    max_retry_delay_ms: u64,
}

impl ChatClient {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            http,
            api_key: api_key.into(),
            api_url: api_url.into(),
            model: model.into(),
            max_retries: 3,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
        }
    }

    /// Build a provider client from `{prefix}_API_KEY`, `{prefix}_API_URL`
    /// and `{prefix}_MODEL`, with shared retry tuning.
    pub fn from_env(name: &str, prefix: &str, default_url: &str, default_model: &str) -> Self {
        let mut client = Self::new(
            name,
            config_rs::env_or(&format!("{}_API_KEY", prefix), ""),
            config_rs::env_or(&format!("{}_API_URL", prefix), default_url),
            config_rs::env_or(&format!("{}_MODEL", prefix), default_model),
        );

        client.max_retries = config_rs::env_parse("PROVIDER_MAX_RETRIES", 3);
        client.initial_retry_delay_ms = config_rs::env_parse("PROVIDER_INITIAL_RETRY_DELAY_MS", 1000);
        client.max_retry_delay_ms = config_rs::env_parse("PROVIDER_MAX_RETRY_DELAY_MS", 30000);
        client
    }

    /// Override the retry tuning (used by tests to avoid real waits).
    pub fn with_retry(mut self, max_retries: u32, initial_ms: u64, max_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.initial_retry_delay_ms = initial_ms;
        self.max_retry_delay_ms = max_ms;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_retry_delay_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .with_randomization_factor(0.5)
            .build()
    }

    /// Generate a text completion, retrying transient failures with
    /// exponential backoff.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(self.name.clone()));
        }

        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(1000),
        };

        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                log::info!("Retry attempt {} for {} provider request", attempt, self.name);
            }

            match self.execute_request(&request_body).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !err.is_retryable() || attempt > self.max_retries {
                        log::error!(
                            "{} provider request failed after {} attempts: {}",
                            self.name,
                            attempt,
                            err
                        );
                        return Err(err);
                    }

                    match backoff.next_backoff() {
                        Some(backoff_duration) => {
                            log::warn!(
                                "Retryable error from {} provider: {}. Retrying in {:?}",
                                self.name,
                                err,
                                backoff_duration
                            );

                            // Small random jitter so concurrent requests do not
                            // retry in lockstep.
                            let jitter = rand::thread_rng().gen_range(0..=200);
                            tokio::time::sleep(backoff_duration + Duration::from_millis(jitter))
                                .await;
                        }
                        None => {
                            log::error!("Exceeded maximum backoff time: {}", err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    // Execute a single request attempt
    async fn execute_request(
        &self,
        request_body: &ChatCompletionRequest,
    ) -> Result<String, ProviderError> {
        let response = match self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                if err.is_timeout() {
                    return Err(ProviderError::Network(format!("Request timed out: {}", err)));
                } else if err.is_connect() {
                    return Err(ProviderError::Network(format!("Connection failed: {}", err)));
                } else {
                    return Err(ProviderError::Network(format!("Network error: {}", err)));
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();

            return match status.as_u16() {
                400 => Err(ProviderError::InvalidRequest(format!("Bad request: {}", text))),
                401 => Err(ProviderError::InvalidRequest(format!("Unauthorized: {}", text))),
                403 => Err(ProviderError::InvalidRequest(format!("Forbidden: {}", text))),
                404 => Err(ProviderError::InvalidRequest(format!("Not found: {}", text))),
                429 => Err(ProviderError::RateLimited(text)),
                500 | 502 | 503 | 504 => Err(ProviderError::Server(format!(
                    "Server error ({}): {}",
                    status, text
                ))),
                _ => Err(ProviderError::Server(format!(
                    "Unexpected status ({}): {}",
                    status, text
                ))),
            };
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Parse(format!("Failed to parse response: {}", err)))?;

        match data.choices.first() {
            Some(choice) => {
                if let Some(usage) = &data.usage {
                    log::info!(
                        "{} provider request completed. Used {} tokens",
                        self.name,
                        usage.total_tokens
                    );
                }
                Ok(choice.message.content.clone())
            }
            None => Err(ProviderError::Parse(
                "No choices returned in response".to_string(),
            )),
        }
    }
}
