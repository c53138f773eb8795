use anyhow::Result;
use clap::Parser;
use concord_server::config::{TEXT_API_BASE_DEFAULT, TEXT_API_KEY_ENV, TEXT_MODEL_DEFAULT};
use concord_server::generator::{ContentGenerator, HttpTextService};
use concord_server::{build_router, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "concord-server", about = "Room-based team-consensus game server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9001")]
    listen: String,

    /// Base URL of the chat-completion endpoint.
    #[arg(long, default_value = TEXT_API_BASE_DEFAULT)]
    text_api_base: String,

    /// Model requested from the text service.
    #[arg(long, default_value = TEXT_MODEL_DEFAULT)]
    text_model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let api_key = std::env::var(TEXT_API_KEY_ENV).unwrap_or_default();
    if api_key.is_empty() {
        warn!("{TEXT_API_KEY_ENV} not set; round content will come from fallbacks");
    }

    let service = Arc::new(HttpTextService::new(
        args.text_api_base,
        api_key,
        args.text_model,
    ));
    let state = AppState::new(Arc::new(ContentGenerator::new(service)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("listening on ws://{}/ws", args.listen);
    axum::serve(listener, app).await?;
    Ok(())
}
