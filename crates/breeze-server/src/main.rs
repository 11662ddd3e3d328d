mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Context;
use breeze::agent::{Agent, RunConfig};
use breeze::chat::ChatApp;
use breeze::providers::openai::OpenAiProvider;
use breeze::tools::weather::GetWeather;
use configuration::Settings;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Values from a local .env file, when present, count as environment
    dotenv::dotenv().ok();

    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new()?;

    let provider = OpenAiProvider::new(settings.provider.into_config())?;
    info!(model = %provider.model(), "using provider");

    let agent = Agent::new(settings.agent.name, settings.agent.instructions).with_tool(GetWeather)?;
    let run_config = RunConfig::new(Arc::new(provider)).with_max_turns(settings.agent.max_turns);
    let state = AppState::new(ChatApp::new(agent, run_config));

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let addr = settings
        .server
        .socket_addr()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
