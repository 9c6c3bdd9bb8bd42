//! # Tortik — birthday reminder bot for Telegram
//!
//! Remembers birthdays per chat and reminds at 09:00 local time, on
//! the day itself and/or a few days before.
//!
//! Usage:
//!   tortik                          # config from ~/.tortik/config.toml
//!   tortik --config ./tortik.toml   # explicit config file
//!   tortik --database ./dev.db      # database path override

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use tortik_bot::Bot;
use tortik_core::{TortikConfig, Transport};
use tortik_scheduler::{Notifier, TimerEngine, rehydrate};
use tortik_store::Store;
use tortik_telegram::TelegramApi;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tortik", version, about = "🎂 Tortik — birthday reminder bot for Telegram")]
struct Cli {
    /// Path to config file (default: ~/.tortik/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path override
    #[arg(long)]
    database: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tortik=debug,tortik_scheduler=debug,tortik_telegram=debug,tortik_bot=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => TortikConfig::load_from(Path::new(&expand_path(path)))?,
        None => TortikConfig::load()?,
    };

    let Some(token) = config.bot_token() else {
        anyhow::bail!(
            "No bot token. Set TORTIK_BOT_TOKEN or add it to {}",
            TortikConfig::default_path().display()
        );
    };

    let db_path = expand_path(cli.database.as_deref().unwrap_or(&config.database));
    let store = Arc::new(Store::open(Path::new(&db_path))?);

    let mut telegram_config = config.telegram.clone();
    telegram_config.bot_token = token;

    let poller = TelegramApi::new(telegram_config.clone());
    let me = poller.get_me().await.context("Cannot reach Telegram (check the bot token)")?;
    let bot_username = me.username.clone();

    let engine = Arc::new(TimerEngine::new());
    let report = rehydrate(&store, &engine, Utc::now())?;

    println!("🎂 Tortik v{}", env!("CARGO_PKG_VERSION"));
    println!("   🤖 Bot:      @{}", bot_username.as_deref().unwrap_or("unknown"));
    println!("   🗄️  Database: {db_path}");
    println!("   ⏰ Timers:   {} restored", report.registered);
    println!();

    let transport: Arc<dyn Transport> = Arc::new(TelegramApi::new(telegram_config));
    let dispatcher = Arc::new(Notifier::new(store.clone(), engine.clone(), transport.clone()));
    let engine_handle = engine.start(dispatcher);

    let bot = Bot::new(store, engine, transport, bot_username);
    let mut updates = poller.start_polling();
    tracing::info!("✅ tortik is up, polling for updates");

    loop {
        tokio::select! {
            maybe = updates.next() => {
                match maybe {
                    Some(msg) => {
                        if let Err(e) = bot.handle_message(&msg).await {
                            tracing::warn!("handler error in chat {}: {e}", msg.chat.id);
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    engine_handle.stop().await;
    Ok(())
}
