// timeline-relay-rs/src/tests.rs
// Route-level tests for the relay, driven through the router with an
// in-process oneshot call and a wiremock upstream where needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::providers::ChatClient;
use crate::sentiment::SentimentModel;
use crate::upstream::UpstreamClient;
use crate::{bearer_token, create_router, first_value, joined_values, AppState};

fn test_state(upstream_base: &str, default_token: &str) -> Arc<AppState> {
    Arc::new(AppState {
        // Zero default retry-after so rate-limit paths spend no real time.
        upstream: UpstreamClient::new(upstream_base, default_token, 3, 0),
        sentiment: Arc::new(SentimentModel::new()),
        analysis_provider: ChatClient::new(
            "analysis",
            "",
            "http://127.0.0.1:1/v1/chat/completions",
            "test-model",
        ),
        context_provider: ChatClient::new(
            "context",
            "",
            "http://127.0.0.1:1/v1/chat/completions",
            "test-model",
        ),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

#[test]
fn test_query_param_helpers() {
    let raw = vec![
        ("user_fields".to_string(), "description".to_string()),
        ("user_fields".to_string(), "created_at".to_string()),
        ("max_results".to_string(), "25".to_string()),
    ];

    assert_eq!(
        joined_values(&raw, "user_fields"),
        Some("description,created_at".to_string())
    );
    assert_eq!(joined_values(&raw, "expansions"), None);
    assert_eq!(first_value(&raw, "max_results"), Some("25".to_string()));
    assert_eq!(first_value(&raw, "since_id"), None);
}

#[test]
fn test_bearer_token_extraction() {
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(bearer_token(&headers), None);

    headers.insert("authorization", "Bearer abc".parse().unwrap());
    assert_eq!(bearer_token(&headers), Some("abc".to_string()));

    headers.insert("authorization", "Basic dXNlcg==".parse().unwrap());
    assert_eq!(bearer_token(&headers), None);
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let state = test_state("http://127.0.0.1:1", "default-token");

    let response = create_router(state.clone()).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], false);

    state.sentiment.load().await;

    let response = create_router(state).oneshot(get("/health")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], true);
}

#[tokio::test]
async fn test_sentiment_endpoint_scores_in_order() {
    let state = test_state("http://127.0.0.1:1", "default-token");
    state.sentiment.load().await;

    let request = post_json(
        "/analyze/sentiment",
        &json!({"tweets": ["I love this", "I hate this"]}),
    );
    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let individual = body["individual"].as_array().unwrap();
    assert_eq!(individual.len(), 2);
    assert_eq!(individual[0]["text"], "I love this");
    assert_eq!(individual[0]["sentiment"], "positive");
    assert_eq!(individual[1]["text"], "I hate this");
    assert_eq!(individual[1]["sentiment"], "negative");

    // Overall label matches the largest averaged component.
    let scores = &body["overall"]["scores"];
    let (mut label, mut best) = ("negative", scores["negative"].as_f64().unwrap());
    if scores["neutral"].as_f64().unwrap() > best {
        label = "neutral";
        best = scores["neutral"].as_f64().unwrap();
    }
    if scores["positive"].as_f64().unwrap() > best {
        label = "positive";
    }
    assert_eq!(body["overall"]["sentiment"], label);
}

#[tokio::test]
async fn test_sentiment_endpoint_degraded_stub() {
    let state = test_state("http://127.0.0.1:1", "default-token");

    let request = post_json("/analyze/sentiment", &json!({"tweets": ["anything at all"]}));
    let response = create_router(state).oneshot(request).await.unwrap();

    let body = body_json(response).await;
    let entry = &body["individual"][0];
    assert_eq!(entry["sentiment"], "neutral");
    assert_eq!(entry["scores"]["negative"], 0.0);
    assert_eq!(entry["scores"]["neutral"], 1.0);
    assert_eq!(entry["scores"]["positive"], 0.0);
    assert_eq!(entry["confidence"], 1.0);
    assert_eq!(body["overall"]["sentiment"], "neutral");
}

#[tokio::test]
async fn test_sentiment_endpoint_empty_batch() {
    let state = test_state("http://127.0.0.1:1", "default-token");
    state.sentiment.load().await;

    let request = post_json("/analyze/sentiment", &json!({"tweets": []}));
    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["individual"].as_array().unwrap().is_empty());
    assert_eq!(body["overall"]["sentiment"], "neutral");
    assert_eq!(body["overall"]["scores"]["neutral"], 1.0);
}

#[tokio::test]
async fn test_ai_endpoint_reports_missing_provider() {
    let state = test_state("http://127.0.0.1:1", "default-token");

    let request = post_json("/analyze/tweets/ai", &json!({"tweets": ["hello"], "concise": true}));
    let response = create_router(state).oneshot(request).await.unwrap();

    // Provider misconfiguration is reported in the body, not as a 5xx.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not configured"));
    assert_eq!(body["analysis"], "");
    assert!(body.get("context").is_none());
}

#[tokio::test]
async fn test_ai_endpoint_context_is_null_without_secondary_provider() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Posts look upbeat"}}],
            "usage": {"total_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let state = Arc::new(AppState {
        upstream: UpstreamClient::new("http://127.0.0.1:1", "default-token", 3, 0),
        sentiment: Arc::new(SentimentModel::new()),
        analysis_provider: ChatClient::new(
            "analysis",
            "test-key",
            format!("{}/v1/chat/completions", server.uri()),
            "test-model",
        ),
        context_provider: ChatClient::new(
            "context",
            "",
            "http://127.0.0.1:1/v1/chat/completions",
            "test-model",
        ),
    });

    let request = post_json("/analyze/tweets/ai", &json!({"tweets": ["hello"]}));
    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["analysis"], "Posts look upbeat");

    // The context key must be present as an explicit null, and the success
    // shape carries no error key.
    let fields = body.as_object().unwrap();
    assert!(fields.contains_key("context"));
    assert!(fields["context"].is_null());
    assert!(!fields.contains_key("error"));
}

#[tokio::test]
async fn test_chat_endpoint_reports_missing_provider() {
    let state = test_state("http://127.0.0.1:1", "default-token");

    let request = post_json(
        "/analyze/tweets/chat",
        &json!({"tweets": ["hello"], "user_message": "what is the mood?"}),
    );
    let response = create_router(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not configured"));
    assert_eq!(body["response"], "");
}

#[tokio::test]
async fn test_user_lookup_passes_through() {
    let server = MockServer::start().await;
    let upstream_body = json!({"data": {"id": "2244994945", "username": "rustlang"}});

    Mock::given(method("GET"))
        .and(path("/users/by/username/rustlang"))
        .and(header("authorization", "Bearer abc"))
        .and(query_param("user.fields", "description,created_at"))
        .and(query_param("expansions", "pinned_tweet_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_body))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let request = Request::builder()
        .uri("/users/by/username/rustlang?user_fields=description&user_fields=created_at&expansions=pinned_tweet_id")
        .header("authorization", "Bearer abc")
        .body(Body::empty())
        .unwrap();

    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, upstream_body);
}

#[tokio::test]
async fn test_placeholder_token_falls_back_to_default() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/by/username/rustlang"))
        .and(header("authorization", "Bearer default-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "1"}})))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let request = Request::builder()
        .uri("/users/by/username/rustlang")
        .header("authorization", "Bearer dummy-token")
        .body(Body::empty())
        .unwrap();

    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_liking_users_passes_through() {
    let server = MockServer::start().await;
    let upstream_body = json!({
        "data": [{"id": "7", "username": "fan"}],
        "meta": {"result_count": 1}
    });

    Mock::given(method("GET"))
        .and(path("/tweets/99/liking_users"))
        .and(header("authorization", "Bearer abc"))
        .and(query_param("max_results", "50"))
        .and(query_param("pagination_token", "tok123"))
        .and(query_param("user.fields", "description,created_at"))
        .and(query_param("expansions", "pinned_tweet_id"))
        .and(query_param("tweet.fields", "text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_body))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let request = Request::builder()
        .uri(
            "/tweets/99/liking_users?max_results=50&pagination_token=tok123\
             &user_fields=description&user_fields=created_at\
             &expansions=pinned_tweet_id&tweet_fields=text",
        )
        .header("authorization", "Bearer abc")
        .body(Body::empty())
        .unwrap();

    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, upstream_body);
}

#[tokio::test]
async fn test_user_posts_applies_default_max_results() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/42/tweets"))
        .and(query_param("max_results", "10"))
        .and(header("authorization", "Bearer default-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [], "meta": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let response = create_router(state)
        .oneshot(get("/users/42/tweets"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_exhaustion_surfaces_error_payload() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/42/tweets"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let response = create_router(state)
        .oneshot(get("/users/42/tweets"))
        .await
        .unwrap();

    // The exhausted-retries payload keeps the 200-with-error-shape convention.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["errors"][0]["detail"],
        "Maximum retries exceeded due to rate limits"
    );
}

#[tokio::test]
async fn test_check_token_without_configured_token() {
    let state = test_state("http://127.0.0.1:1", "");

    let response = create_router(state).oneshot(get("/check-token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("No bearer token"));
}

#[tokio::test]
async fn test_check_token_valid() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer default-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "1"}})))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let response = create_router(state).oneshot(get("/check-token")).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["data"]["data"]["id"], "1");
}

#[tokio::test]
async fn test_check_token_rejected() {
    let server = MockServer::start().await;
    let rejection = json!({"errors": [{"detail": "Unauthorized"}]});

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(&rejection))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri(), "default-token");
    let response = create_router(state).oneshot(get("/check-token")).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], rejection);
}

#[tokio::test]
async fn test_transport_failure_maps_to_bad_gateway() {
    // Nothing listens on port 1, so the upstream call fails at the
    // connection level and must surface as an explicit 5xx.
    let state = test_state("http://127.0.0.1:1", "default-token");

    let response = create_router(state)
        .oneshot(get("/users/42/tweets"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("Upstream request failed"));
    assert_eq!(body["code"], 502);
}
