//! Plays one scripted sealed-bid table against an in-process server.
use anyhow::Result;
use client_bootstrap::{ServerBuilder, SessionConfig, setup_logging};
use game_client::Client;
use game_content::SealedRoundRules;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = SessionConfig::from_env();
    let session_dir = setup_logging(config.session_id.as_deref(), config.log_dir.as_deref())?;
    println!("logging to {}", session_dir.join("client.log").display());

    let service = ServerBuilder::new(config.server.clone())
        .rules(SealedRoundRules::default())
        .build()?;

    Client::builder()
        .config(config)
        .service(service)
        .players(["alice", "bob", "carol"])
        .build()?
        .run()
        .await
}
