// timeline-relay-rs/src/lib.rs
// Timeline Relay - REST relay in front of the upstream social API
//
// Implements:
// - Pass-through endpoints for user lookup, user posts, and liking users
// - Bearer token resolution with a configured default
// - Rate-limit-aware upstream requests (429 + retry-after)
// - Local sentiment scoring with a background-loaded lexicon model
// - AI analysis/chat endpoints backed by external LLM providers

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

pub mod providers;
pub mod sentiment;
pub mod upstream;

#[cfg(test)]
mod tests;

use providers::{
    ChatClient, DEFAULT_CONTEXT_API_URL, DEFAULT_CONTEXT_MODEL, DEFAULT_LLM_API_URL,
    DEFAULT_LLM_MODEL,
};
use sentiment::SentimentModel;
use upstream::{UpstreamClient, UpstreamError};

pub static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Maximum accepted request body size for the analysis endpoints.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub upstream: UpstreamClient,
    pub sentiment: Arc<SentimentModel>,
    pub analysis_provider: ChatClient,
    pub context_provider: ChatClient,
}

impl AppState {
    pub fn from_env() -> Self {
        Self {
            upstream: UpstreamClient::from_env(),
            sentiment: Arc::new(SentimentModel::new()),
            analysis_provider: ChatClient::from_env(
                "analysis",
                "LLM",
                DEFAULT_LLM_API_URL,
                DEFAULT_LLM_MODEL,
            ),
            context_provider: ChatClient::from_env(
                "context",
                "CONTEXT",
                DEFAULT_CONTEXT_API_URL,
                DEFAULT_CONTEXT_MODEL,
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, Serialize)]
pub struct TokenCheckResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Sentiment analysis request body (JSON)
#[derive(Debug, Deserialize)]
pub struct SentimentRequest {
    pub tweets: Vec<String>,
}

/// AI analysis request body (JSON)
#[derive(Debug, Deserialize)]
pub struct AiAnalysisRequest {
    pub tweets: Vec<String>,
    #[serde(default)]
    pub concise: bool,
}

/// Success shape of the AI analysis endpoint. `context` is always present;
/// it is an explicit `null` when the secondary provider had nothing to add.
#[derive(Debug, Serialize)]
pub struct AiAnalysisResponse {
    pub analysis: String,
    pub context: Option<String>,
}

/// AI chat request body (JSON)
#[derive(Debug, Deserialize)]
pub struct ChatAnalysisRequest {
    pub tweets: Vec<String>,
    #[serde(default)]
    pub chat_history: Option<String>,
    pub user_message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatAnalysisResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response: String,
}

/// Build the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/check-token", get(check_token_handler))
        .route("/users/by/username/:username", get(user_by_username_handler))
        .route("/users/:id/tweets", get(user_posts_handler))
        .route("/tweets/:id/liking_users", get(liking_users_handler))
        .route("/analyze/sentiment", post(analyze_sentiment_handler))
        .route("/analyze/tweets/ai", post(analyze_posts_ai_handler))
        .route("/analyze/tweets/chat", post(analyze_posts_chat_handler))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE))
        .layer(cors)
        .with_state(state)
}

/// GET / - Root endpoint
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Timeline Relay",
        "version": "1.0.0",
        "endpoints": [
            "GET /health",
            "GET /check-token",
            "GET /users/by/username/{username}",
            "GET /users/{id}/tweets",
            "GET /tweets/{id}/liking_users",
            "POST /analyze/sentiment",
            "POST /analyze/tweets/ai",
            "POST /analyze/tweets/chat"
        ]
    }))
}

/// GET /health - Health check endpoint
///
/// `status` is always "ok"; `model_loaded` distinguishes degraded mode
/// (neutral sentiment stubs) from fully ready.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: state.sentiment.is_loaded(),
        uptime_seconds: START_TIME.elapsed().as_secs() as i64,
    })
}

/// GET /check-token - Probe the configured default bearer token
async fn check_token_handler(State(state): State<Arc<AppState>>) -> Response {
    if !state.upstream.has_default_token() {
        return Json(TokenCheckResponse {
            status: "error".to_string(),
            message: "No bearer token is configured".to_string(),
            data: None,
            error: None,
        })
        .into_response();
    }

    let url = format!("{}/users/me", state.upstream.base_url());
    let token = state.upstream.resolve_token(None);

    match state.upstream.get_json(&url, token, &[]).await {
        Ok(result) => {
            if result.get("data").is_some() {
                Json(TokenCheckResponse {
                    status: "ok".to_string(),
                    message: "Bearer token is valid".to_string(),
                    data: Some(result),
                    error: None,
                })
                .into_response()
            } else {
                Json(TokenCheckResponse {
                    status: "error".to_string(),
                    message: "Bearer token was rejected by the upstream API".to_string(),
                    data: None,
                    error: Some(result),
                })
                .into_response()
            }
        }
        Err(err) => upstream_error_response(err),
    }
}

/// GET /users/by/username/{username} - Lookup a user by username
async fn user_by_username_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Query(raw): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    log::info!("Looking up user: {}", username);

    let mut params = Vec::new();
    push_joined(
        &mut params,
        &raw,
        &[
            ("user_fields", "user.fields"),
            ("expansions", "expansions"),
            ("tweet_fields", "tweet.fields"),
        ],
    );

    let caller = bearer_token(&headers);
    let token = state.upstream.resolve_token(caller.as_deref());
    let url = format!("{}/users/by/username/{}", state.upstream.base_url(), username);

    match state.upstream.get_json(&url, token, &params).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => upstream_error_response(err),
    }
}

/// GET /users/{id}/tweets - Fetch a user's posts
async fn user_posts_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(raw): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    log::info!("Fetching posts for user ID: {}", id);

    let mut params = Vec::new();
    push_scalars(
        &mut params,
        &raw,
        &["since_id", "until_id", "pagination_token", "start_time", "end_time"],
    );

    let max_results = first_value(&raw, "max_results").unwrap_or_else(|| "10".to_string());
    params.push(("max_results".to_string(), max_results));

    push_joined(
        &mut params,
        &raw,
        &[
            ("exclude", "exclude"),
            ("tweet_fields", "tweet.fields"),
            ("expansions", "expansions"),
            ("media_fields", "media.fields"),
            ("poll_fields", "poll.fields"),
            ("user_fields", "user.fields"),
            ("place_fields", "place.fields"),
        ],
    );

    let caller = bearer_token(&headers);
    let token = state.upstream.resolve_token(caller.as_deref());
    let url = format!("{}/users/{}/tweets", state.upstream.base_url(), id);

    match state.upstream.get_json(&url, token, &params).await {
        Ok(result) => {
            let count = result
                .get("data")
                .and_then(Value::as_array)
                .map(|posts| posts.len())
                .unwrap_or(0);
            log::info!("Retrieved {} posts for user {}", count, id);
            Json(result).into_response()
        }
        Err(err) => upstream_error_response(err),
    }
}

/// GET /tweets/{id}/liking_users - Users who liked a post
async fn liking_users_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(raw): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    log::info!("Fetching liking users for post: {}", id);

    let mut params = Vec::new();
    push_scalars(&mut params, &raw, &["max_results", "pagination_token"]);
    push_joined(
        &mut params,
        &raw,
        &[
            ("user_fields", "user.fields"),
            ("expansions", "expansions"),
            ("tweet_fields", "tweet.fields"),
        ],
    );

    let caller = bearer_token(&headers);
    let token = state.upstream.resolve_token(caller.as_deref());
    let url = format!("{}/tweets/{}/liking_users", state.upstream.base_url(), id);

    match state.upstream.get_json(&url, token, &params).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => upstream_error_response(err),
    }
}

/// POST /analyze/sentiment - Score a batch of posts locally
async fn analyze_sentiment_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SentimentRequest>,
) -> impl IntoResponse {
    log::info!("Analyzing sentiment for {} posts", request.tweets.len());
    Json(state.sentiment.score_batch(&request.tweets))
}

/// POST /analyze/tweets/ai - LLM analysis of a batch of posts
///
/// Primary provider failures are reported in the body with HTTP 200 as
/// `{error, analysis}`. On success the response is `{analysis, context}`,
/// where `context` is null when the secondary provider is unconfigured or
/// fails.
async fn analyze_posts_ai_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AiAnalysisRequest>,
) -> Response {
    log::info!(
        "AI analysis requested for {} posts (concise: {})",
        request.tweets.len(),
        request.concise
    );

    let prompt = build_analysis_prompt(&request.tweets, request.concise);
    let analysis = match state
        .analysis_provider
        .generate(&prompt, Some(ANALYSIS_SYSTEM_PROMPT))
        .await
    {
        Ok(text) => text,
        Err(err) => {
            log::error!("AI analysis failed: {}", err);
            return Json(serde_json::json!({
                "error": err.to_string(),
                "analysis": "",
            }))
            .into_response();
        }
    };

    let context = match state
        .context_provider
        .generate(&build_context_prompt(&request.tweets), Some(CONTEXT_SYSTEM_PROMPT))
        .await
    {
        Ok(text) => Some(text),
        Err(err) => {
            log::warn!("Context provider unavailable: {}", err);
            None
        }
    };

    Json(AiAnalysisResponse { analysis, context }).into_response()
}

/// POST /analyze/tweets/chat - Chat about a batch of posts
async fn analyze_posts_chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatAnalysisRequest>,
) -> impl IntoResponse {
    log::info!(
        "Chat request over {} posts: {}",
        request.tweets.len(),
        request.user_message
    );

    let prompt = build_chat_prompt(
        &request.tweets,
        request.chat_history.as_deref(),
        &request.user_message,
    );

    match state
        .analysis_provider
        .generate(&prompt, Some(CHAT_SYSTEM_PROMPT))
        .await
    {
        Ok(text) => Json(ChatAnalysisResponse {
            error: None,
            response: text,
        }),
        Err(err) => {
            log::error!("Chat completion failed: {}", err);
            Json(ChatAnalysisResponse {
                error: Some(err.to_string()),
                response: String::new(),
            })
        }
    }
}

const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a social media analyst. Ground every observation in the posts you are given \
     and do not speculate beyond them.";

const CONTEXT_SYSTEM_PROMPT: &str =
    "You provide brief background context for topics mentioned in social media posts. \
     Answer with a single short paragraph.";

const CHAT_SYSTEM_PROMPT: &str =
    "You answer questions about a set of social media posts. Base your answers on the \
     posts and the conversation so far.";

fn numbered_posts(tweets: &[String]) -> String {
    tweets
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_analysis_prompt(tweets: &[String], concise: bool) -> String {
    let style = if concise {
        "Keep the analysis to two or three sentences."
    } else {
        "Describe the main themes, the overall tone, and anything notable."
    };
    format!(
        "Analyze the following posts. {}\n\nPosts:\n{}",
        style,
        numbered_posts(tweets)
    )
}

fn build_context_prompt(tweets: &[String]) -> String {
    format!(
        "Give brief background context for the topics mentioned in these posts:\n{}",
        numbered_posts(tweets)
    )
}

fn build_chat_prompt(tweets: &[String], chat_history: Option<&str>, user_message: &str) -> String {
    let mut prompt = format!("Posts under discussion:\n{}\n", numbered_posts(tweets));
    if let Some(history) = chat_history {
        prompt.push_str(&format!("\nConversation so far:\n{}\n", history));
    }
    prompt.push_str(&format!("\nUser: {}", user_message));
    prompt
}

/// Extract the caller's bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// First value of a query parameter, if present.
fn first_value(raw: &[(String, String)], key: &str) -> Option<String> {
    raw.iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.clone())
}

/// All values of a repeated query parameter, comma-joined the way the
/// upstream API expects list parameters.
fn joined_values(raw: &[(String, String)], key: &str) -> Option<String> {
    let values: Vec<&str> = raw
        .iter()
        .filter(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

fn push_scalars(params: &mut Vec<(String, String)>, raw: &[(String, String)], keys: &[&str]) {
    for key in keys {
        if let Some(value) = first_value(raw, key) {
            params.push((key.to_string(), value));
        }
    }
}

fn push_joined(
    params: &mut Vec<(String, String)>,
    raw: &[(String, String)],
    mappings: &[(&str, &str)],
) {
    for (key, upstream_key) in mappings {
        if let Some(joined) = joined_values(raw, key) {
            params.push((upstream_key.to_string(), joined));
        }
    }
}

/// Map executor failures that carry no upstream body to an explicit 502.
fn upstream_error_response(err: UpstreamError) -> Response {
    log::error!("Upstream request failed: {}", err);
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorResponse {
            error: format!("Upstream request failed: {}", err),
            code: 502,
        }),
    )
        .into_response()
}
