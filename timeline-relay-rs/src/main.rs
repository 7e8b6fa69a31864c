// timeline-relay-rs/src/main.rs
// Timeline Relay - HTTP entry point
//
// Loads configuration from the environment, starts the background
// sentiment-model load, and serves the relay router.

use std::sync::Arc;

use timeline_relay::{create_router, AppState, START_TIME};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let _ = *START_TIME;

    let state = Arc::new(AppState::from_env());

    if !state.upstream.has_default_token() {
        log::warn!("TWITTER_BEARER_TOKEN environment variable is not set!");
    }
    if config_rs::optional_env("TWITTER_API_KEY").is_none()
        || config_rs::optional_env("TWITTER_API_SECRET").is_none()
    {
        log::info!("Upstream API key/secret pair is not fully configured");
    }
    if config_rs::optional_env("TWITTER_ACCESS_TOKEN").is_none()
        || config_rs::optional_env("TWITTER_ACCESS_TOKEN_SECRET").is_none()
    {
        log::info!("Upstream access token pair is not fully configured");
    }
    for provider in [&state.analysis_provider, &state.context_provider] {
        if !provider.is_configured() {
            log::warn!(
                "{} provider has no API key; AI endpoints will report a configuration error",
                provider.name()
            );
        }
    }

    // Start the sentiment model load in the background. The service begins
    // serving immediately and reports degraded mode until the publish lands.
    let sentiment = state.sentiment.clone();
    tokio::spawn(async move {
        sentiment.load().await;
    });

    let addr = config_rs::get_bind_address("GATEWAY", 8000);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Timeline Relay starting on {}", addr);
    println!("Timeline Relay listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
