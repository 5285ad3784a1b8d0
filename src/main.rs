use std::sync::Arc;

use teloxide::Bot;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use chaosbot::telegram_log::TelegramLogLayer;
use chaosbot::{AppState, Config, Database, scheduler, serve, worker};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Failed to read .env: {e}");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create {}: {e}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(&log_dir, "chaosbot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting Chaos H-2000...");
    info!("Timezone: {}", config.timezone);
    if config.telegram_webhook_secret.is_none() {
        warn!("TELEGRAM_WEBHOOK_SECRET not set, webhook accepts unauthenticated calls");
    }
    if config.sheets.is_none() {
        info!("Google Sheets export disabled (no spreadsheet or credentials)");
    }

    let db = match Database::open(&config.database) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let (jobs, rx) = worker::channel();
    let state = match AppState::new(config, db, bot, jobs) {
        Ok(state) => state,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let worker = worker::spawn(Arc::new(state.bot_handler()), rx);
    let schedules = match scheduler::spawn(state.clone()) {
        Ok(handles) => handles,
        Err(e) => {
            error!("Invalid schedule: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
        }
        info!("🛑 Shutting down...");
    };

    if let Err(e) = serve(state, shutdown).await {
        error!("HTTP server failed: {e}");
    }

    for handle in schedules {
        handle.abort();
    }
    // the router owned the last job sender, so the worker drains and exits
    if let Err(e) = worker.await {
        error!("Worker task failed: {e}");
    }
    info!("👋 Bye");
}
