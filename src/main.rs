//! Group Tip Bot - Main Entry Point
//!
//! A Telegram bot that posts rotating tip messages in managed groups,
//! refreshes invite links, and exchanges data with its sibling bots
//! over a shared channel pair.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use group_tip_bot::config::{BotSettings, GroupDirectory, TelegramConfig};
use group_tip_bot::exchange::Publisher;
use group_tip_bot::jobs::{JobContext, MaintenanceRunner, RunnerMessage, report_status};
use group_tip_bot::state::SharedState;
use group_tip_bot::telegram::{TelegramBot, TelegramError};

/// Telegram group management bot.
#[derive(Parser, Debug)]
#[command(name = "tip_bot")]
#[command(about = "Post rotating tips, refresh invite links and exchange data with sibling bots")]
#[command(version)]
struct Args {
    /// Path to the bot settings JSON file.
    #[arg(short, long, default_value = "settings.json")]
    settings: String,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let settings = BotSettings::load(&args.settings).context("Failed to load bot settings")?;
    let key = settings.key_bytes().context("Invalid exchange key")?;

    std::fs::create_dir_all(&settings.data_dir).context("Failed to create the data directory")?;
    std::fs::create_dir_all(&settings.tmp_dir).context("Failed to create the tmp directory")?;
    if let Some(log_dir) = settings.log_path.parent() {
        std::fs::create_dir_all(log_dir).context("Failed to create the log directory")?;
    }

    let groups = GroupDirectory::load(&settings.data_dir);
    info!("Loaded {} managed groups", groups.len());

    let state = SharedState::load(&settings.data_dir);

    // Connect to Telegram
    let bot = TelegramBot::connect(&tg_config, settings.min_send_interval_secs)
        .await
        .context("Failed to connect to Telegram")?;

    // Handle authentication if needed
    if !bot
        .is_authorized()
        .await
        .context("Failed to check authorization")?
    {
        authenticate(&bot, &tg_config).await?;
    }

    // Register the exchange and operator channels plus the managed
    // groups so messaging calls can address them
    bot.register_channel(&settings.exchange_channel).await;
    bot.register_channel(&settings.hide_channel).await;
    bot.register_channel(&settings.debug_channel).await;
    bot.register_channel(&settings.critical_channel).await;
    for group in groups.iter() {
        bot.register_group(&group.to_ref()).await;
        if let Some(channel) = group.channel {
            bot.register_channel(&channel).await;
        }
    }

    let api = Arc::new(bot);
    let publisher = Arc::new(Publisher::new(Arc::clone(&api), &settings, key));

    let ctx = JobContext {
        api: Arc::clone(&api),
        publisher,
        state: Arc::new(state),
        groups: Arc::new(RwLock::new(groups)),
        settings: Arc::new(settings),
    };

    // Create the runner channel
    let (runner_tx, runner_rx) = mpsc::channel::<RunnerMessage>(32);

    let runner = MaintenanceRunner::new(ctx.clone());

    info!("Starting maintenance runner...");
    let runner_handle = tokio::spawn(async move {
        runner.run(runner_rx).await;
    });

    // Tell the backup coordinator we are up
    report_status(&ctx, "start").await;

    info!("Bot is running. Use Ctrl+C to stop.");

    // Wait for Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    // Cleanup
    info!("Shutting down...");
    let _ = runner_tx.send(RunnerMessage::Shutdown).await;
    let _ = runner_handle.await;
    ctx.api.disconnect();

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Handles Telegram authentication.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = bot
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => {
            info!("Successfully signed in!");
            Ok(())
        }
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;

            info!("Successfully signed in with 2FA!");
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
