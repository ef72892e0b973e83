//! OTP Broker
//!
//! Telegram-backed phone verification and one-time passcode delivery.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use otp_broker::{
    routes, ApiLimiters, AppState, Config, InMemoryStore, IngestMode, Poller, SqliteStore, Store,
    TelegramClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otp_broker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(port = config.port, mode = ?config.ingest_mode, "Loaded configuration");

    match &config.database_path {
        Some(path) => {
            tracing::info!(path = %path, "Using SQLite store");
            let store = Arc::new(SqliteStore::open(path)?);
            serve(config, store).await
        }
        None => {
            tracing::info!("Using in-memory store (state is lost on restart)");
            serve(config, Arc::new(InMemoryStore::new())).await
        }
    }
}

async fn serve<S: Store + 'static>(config: Config, store: Arc<S>) -> Result<()> {
    let client = Arc::new(TelegramClient::new(config.bot_token.clone()));

    let limiters = if config.rate_limit > 0 {
        ApiLimiters::fixed_window(config.rate_limit, config.rate_window)
    } else {
        ApiLimiters::noop()
    };

    let state = Arc::new(AppState::new(store, client.clone(), &config, limiters));

    let cancel = CancellationToken::new();

    let poller_task = match config.ingest_mode {
        IngestMode::Poll => {
            let poller = Poller::new(client, state.bot.clone(), config.poll.clone());
            let token = cancel.clone();
            Some(tokio::spawn(async move { poller.run(token).await }))
        }
        IngestMode::Webhook => {
            if config.webhook_secret.is_none() {
                tracing::warn!("Webhook mode without WEBHOOK_SECRET; updates are unauthenticated");
            }
            None
        }
    };

    // Create router
    let app = routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Broker listening on http://{}", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(task) = poller_task {
        let _ = task.await;
    }

    Ok(())
}
