// timeline-relay-rs/src/upstream.rs
//
// Resilient client for the upstream social API
//
// This module provides:
// - GET requests to the upstream API with bearer authentication
// - Bounded retry on 429 responses, honoring the `retry-after` header
// - Pass-through of upstream error bodies as regular results
// - Bearer token resolution (caller-supplied vs. configured default)
//
// Configuration (.env file):
// - UPSTREAM_API_BASE: Upstream API base URL
// - TWITTER_BEARER_TOKEN: Default bearer token
// - UPSTREAM_MAX_RETRIES: Rate-limit retry budget (default: 3)
// - UPSTREAM_RETRY_AFTER_DEFAULT_SECS: Wait when `retry-after` is absent (default: 60)

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Base URL of the upstream social API.
pub const DEFAULT_API_BASE: &str = "https://api.twitter.com/2";

/// Placeholder token some frontends send when they hold no real credential.
const PLACEHOLDER_TOKEN: &str = "dummy-token";

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Failures for which no upstream body exists to pass through.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The request never produced a response (DNS/connection failure, timeout).
    #[error("upstream transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response arrived but its body was not valid JSON.
    #[error("upstream returned status {status} with an unparsable body: {source}")]
    InvalidBody {
        status: u16,
        #[source]
        source: reqwest::Error,
    },
}

/// Parse the `retry-after` header as integer seconds, falling back to
/// `default_secs` when the header is absent or unparsable.
fn retry_after_secs(headers: &HeaderMap, default_secs: u64) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_secs)
}

/// Payload returned when the rate-limit retry budget is spent.
fn exhausted_retries_payload() -> Value {
    json!({
        "errors": [{"detail": "Maximum retries exceeded due to rate limits"}]
    })
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    default_token: String,
    max_retries: u32,
    retry_after_default_secs: u64,
}

impl UpstreamClient {
    pub fn new(
        base_url: impl Into<String>,
        default_token: impl Into<String>,
        max_retries: u32,
        retry_after_default_secs: u64,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_token: default_token.into(),
            max_retries,
            retry_after_default_secs,
        }
    }

    /// Build a client from environment variables.
    pub fn from_env() -> Self {
        Self::new(
            config_rs::env_or("UPSTREAM_API_BASE", DEFAULT_API_BASE),
            config_rs::env_or("TWITTER_BEARER_TOKEN", ""),
            config_rs::env_parse("UPSTREAM_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            config_rs::env_parse("UPSTREAM_RETRY_AFTER_DEFAULT_SECS", DEFAULT_RETRY_AFTER_SECS),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_default_token(&self) -> bool {
        !self.default_token.is_empty()
    }

    /// Select the bearer token to attach to an upstream call.
    ///
    /// A caller-supplied token wins unless it is empty or the literal
    /// placeholder value, in which case the configured default applies.
    /// Well-formedness is not checked here; the upstream API rejects bad
    /// tokens with its own error payload.
    pub fn resolve_token<'a>(&'a self, caller: Option<&'a str>) -> &'a str {
        match caller {
            Some(token) if !token.is_empty() && token != PLACEHOLDER_TOKEN => token,
            _ => &self.default_token,
        }
    }

    /// Issue a GET request and return the upstream JSON body.
    ///
    /// 429 responses are retried after the `retry-after` wait, up to
    /// `max_retries` rate-limited responses; once the budget is spent a
    /// synthesized exhausted-retries payload is returned as a normal result.
    /// Any other status, success or not, has its JSON body passed through
    /// verbatim. Only responseless transport failures and unparsable bodies
    /// surface as `UpstreamError`.
    pub async fn get_json(
        &self,
        url: &str,
        token: &str,
        params: &[(String, String)],
    ) -> Result<Value, UpstreamError> {
        let mut rate_limited = 0u32;

        loop {
            let response = self
                .http
                .get(url)
                .bearer_auth(token)
                .query(params)
                .send()
                .await?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after_secs(response.headers(), self.retry_after_default_secs);
                rate_limited += 1;
                log::warn!(
                    "Upstream rate limited ({}/{}). Waiting {} seconds before retrying...",
                    rate_limited,
                    self.max_retries,
                    wait
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;

                if rate_limited >= self.max_retries {
                    log::error!(
                        "Rate-limit retry budget exhausted after {} attempts for {}",
                        rate_limited,
                        url
                    );
                    return Ok(exhausted_retries_payload());
                }
                continue;
            }

            if !status.is_success() {
                log::warn!("Upstream returned {} for {}", status, url);
            }

            return response
                .json::<Value>()
                .await
                .map_err(|source| UpstreamError::InvalidBody {
                    status: status.as_u16(),
                    source,
                });
        }
    }
}
