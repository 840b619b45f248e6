//! services/companion/src/bin/companion.rs

use companion_lib::{
    adapters::Backend,
    config::Config,
    console::{Console, Flow, HELP},
    error::AppError,
};
use minduni_core::{chat::ChatSimulator, JournalFeed, SessionContext};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting companion...");

    // --- 2. Connect to the Backing Service ---
    let backend = Backend::open(&config).await?;
    info!("Connected to project {}.", config.backend.project_id);

    // --- 3. Build the Session and the Journal Feed ---
    let session = SessionContext::start(
        backend.auth.clone(),
        backend.store.clone(),
        config.provisioning,
    );
    let feed = JournalFeed::new(backend.store.clone());
    let follower = feed.follow_session(&session);
    let chat = ChatSimulator::new(config.chat_reply_delay);

    // --- 4. Run the Console ---
    let mut console = Console::new(session, feed, chat, std::io::stdout());
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut quit = false;
    while let Some(line) = lines.next_line().await? {
        if console.handle_line(&line).await? == Flow::Quit {
            quit = true;
            break;
        }
    }

    // --- 5. Tear Down ---
    if !quit {
        console.feed().deactivate();
        console.session().shutdown().await;
    }
    follower.abort();
    info!("Companion stopped.");
    Ok(())
}
