//! Slotwatch - Headless Server
//!
//! Watches warehouse acceptance slots and stock for every registered tenant
//! and notifies them over Telegram.

mod config;

use clap::Parser;
use config::AppConfig;
use slotwatch_alerts::{
    Database, EngineParts, MonitoringEngine, SettingsStore, TelegramBot, TelegramDelivery,
};
use slotwatch_core::{Clock, GlobalDefaults, SystemClock};
use slotwatch_feeds::{ApiClient, ReqwestTransport, UpstreamApi};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Slotwatch CLI
#[derive(Parser, Debug)]
#[command(name = "slotwatch")]
#[command(about = "Warehouse acceptance slot monitor", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// SQLite URL (overrides DATABASE_URL and the config file)
    #[arg(long)]
    database_url: Option<String>,

    /// Overwrite the stored global defaults with the ones from the config file
    #[arg(long, default_value_t = false)]
    reseed_defaults: bool,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Store the global defaults unless a document already exists.
async fn seed_defaults(db: &Database, defaults: &GlobalDefaults, force: bool) -> Result<(), slotwatch_alerts::StoreError> {
    if !force && db.get_global().await?.is_some() {
        info!("Global defaults already present");
        return Ok(());
    }
    db.put_global(defaults).await?;
    info!(force, "Global defaults seeded");
    Ok(())
}

async fn run_activity_cleanup(db: Database, clock: Arc<dyn Clock>, retention_days: i64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    loop {
        ticker.tick().await;
        match db.cleanup_old_activity(retention_days, clock.now()).await {
            Ok(removed) if removed > 0 => info!(removed, "Old activity entries removed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Activity cleanup failed"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let loaded = AppConfig::load(Path::new(&args.config));

    let level = args
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    if let Some(url) = args
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
    {
        config.database_url = url;
    }

    let Ok(bot_token) = std::env::var("TELEGRAM_BOT_TOKEN") else {
        error!("TELEGRAM_BOT_TOKEN is not set");
        return;
    };

    info!("🚀 Slotwatch starting...");
    info!("  Config: {}", args.config);
    info!("  Database: {}", config.database_url);

    let db = match Database::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return;
        }
    };
    if let Err(e) = seed_defaults(&db, &config.defaults, args.reseed_defaults).await {
        error!("Failed to seed global defaults: {}", e);
        return;
    }

    let transport = match ReqwestTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let client = Arc::new(ApiClient::new(Arc::new(transport), clock.clone()));
    let bot = Bot::new(bot_token);
    let store = Arc::new(db.clone());

    let engine = MonitoringEngine::new(EngineParts {
        settings: store.clone(),
        credentials: store,
        api: UpstreamApi::new(client, clock.clone()),
        delivery: Arc::new(TelegramDelivery::new(bot.clone())),
        clock: clock.clone(),
    });

    match engine.restore_jobs().await {
        Ok(count) => info!("  Restored jobs: {}", count),
        Err(e) => warn!("Failed to restore jobs: {}", e),
    }

    let cleanup = tokio::spawn(run_activity_cleanup(db, clock, config.activity_retention_days));

    info!("Press Ctrl+C to stop...");
    let telegram = Arc::new(TelegramBot::new(bot, engine.clone()));
    telegram.run().await;

    warn!("Shutdown signal received");
    cleanup.abort();
    let stopped = engine.shutdown();
    info!("Cancelled {} monitoring jobs", stopped);
    info!("👋 Goodbye!");
}
