//! Telegram transport: message delivery and bot command handlers.

use crate::delivery::Delivery;
use crate::error::{DeliveryError, MonitorError};
use crate::monitor::{MonitoringEngine, Report};
use async_trait::async_trait;
use slotwatch_core::{EffectiveConfig, MonitorKind, TenantChange, TenantId, WarehouseId, WorkingHours};
use slotwatch_engine::{format_number, Callback, Control, SalesPeriod};
use std::fmt::Write;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Register and save your API token. Usage: /start <token>")]
    Start(String),
    #[command(description = "Check acceptance coefficients now")]
    Coefficients,
    #[command(description = "Check coefficients automatically")]
    Auto,
    #[command(description = "Stop automatic coefficient checks")]
    Stop,
    #[command(description = "Show stock now")]
    Stock,
    #[command(description = "Watch stock automatically")]
    Autostock,
    #[command(description = "Stop automatic stock checks")]
    Stopstock,
    #[command(description = "Sales report. Usage: /sales day|week")]
    Sales(String),
    #[command(description = "Advertising campaigns")]
    Promotions,
    #[command(description = "Warehouses to track, at most 5. Usage: /targets 507,117986 (or 'all')")]
    Targets(String),
    #[command(description = "Warehouses to ignore. Usage: /exclude 204939 (or 'clear')")]
    Exclude(String),
    #[command(description = "Coefficient range. Usage: /range 0 6")]
    Range(String),
    #[command(description = "Check interval in minutes. Usage: /interval coefficients 10")]
    Interval(String),
    #[command(description = "Working hours. Usage: /hours 9 22 (or 'off')")]
    Hours(String),
    #[command(description = "Show current configuration")]
    Config,
    #[command(description = "Show help")]
    Help,
}

/// Inline keyboard with one button per row.
pub fn keyboard(controls: &[Control]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        controls
            .iter()
            .map(|c| vec![InlineKeyboardButton::callback(c.label.clone(), c.payload.clone())]),
    )
}

/// Sends tenant messages through the Bot API. The tenant id is the chat id.
#[derive(Clone)]
pub struct TelegramDelivery {
    bot: Bot,
}

impl TelegramDelivery {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Delivery for TelegramDelivery {
    async fn send(&self, tenant: TenantId, text: &str, controls: &[Control]) -> Result<(), DeliveryError> {
        let mut request = self.bot.send_message(ChatId(tenant), text.to_string());
        if !controls.is_empty() {
            request = request.reply_markup(keyboard(controls));
        }
        request.await?;
        Ok(())
    }
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    engine: Arc<MonitoringEngine>,
}

impl TelegramBot {
    pub fn new(bot: Bot, engine: Arc<MonitoringEngine>) -> Self {
        Self { bot, engine }
    }

    /// Run the command and callback handlers until Ctrl+C.
    pub async fn run(self: Arc<Self>) {
        let bot = self.bot.clone();
        let commands = Arc::clone(&self);
        let callbacks = Arc::clone(&self);

        let handler = dptree::entry()
            .branch(Update::filter_message().filter_command::<Command>().endpoint(
                move |bot: Bot, msg: Message, cmd: Command| {
                    let this = Arc::clone(&commands);
                    async move { this.handle_command(bot, msg, cmd).await }
                },
            ))
            .branch(Update::filter_callback_query().endpoint(
                move |bot: Bot, q: CallbackQuery| {
                    let this = Arc::clone(&callbacks);
                    async move { this.handle_callback(bot, q).await }
                },
            ));

        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    /// Run a manual tick in the background; the engine reports its own errors.
    fn spawn_manual(&self, tenant: TenantId, kind: MonitorKind) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let _ = engine.run_once(tenant, kind).await;
        });
    }

    fn spawn_report(&self, tenant: TenantId, report: Report) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let _ = engine.run_report(tenant, report).await;
        });
    }

    async fn start_auto(&self, bot: &Bot, chat: ChatId, kind: MonitorKind) -> Result<(), TelegramError> {
        let interval = self.engine.start(chat.0, kind).await?;
        let minutes = interval.as_secs() / 60;
        bot.send_message(chat, format!("✅ Automatic {kind} checks every {minutes} min."))
            .await?;
        Ok(())
    }

    async fn stop_auto(&self, bot: &Bot, chat: ChatId, kind: MonitorKind) -> Result<(), TelegramError> {
        let text = if self.engine.stop(chat.0, kind).await? {
            format!("⛔ Automatic {kind} checks stopped.")
        } else {
            format!("Automatic {kind} checks are not running.")
        };
        bot.send_message(chat, text).await?;
        Ok(())
    }

    async fn handle_command(&self, bot: Bot, msg: Message, cmd: Command) -> Result<(), TelegramError> {
        let chat = msg.chat.id;
        let tenant = chat.0;

        let result = self.dispatch_command(&bot, chat, cmd).await;
        if let Err(TelegramError::Monitor(e)) = &result {
            error!(tenant, error = %e, "Command failed");
            bot.send_message(chat, e.user_message()).await?;
            return Ok(());
        }
        result
    }

    async fn dispatch_command(&self, bot: &Bot, chat: ChatId, cmd: Command) -> Result<(), TelegramError> {
        let tenant = chat.0;
        match cmd {
            Command::Start(token) => {
                let token = token.trim();
                if token.is_empty() {
                    bot.send_message(
                        chat,
                        "👋 Welcome! Send your marketplace API token with /start <token>.\n\
                         Required scopes: Statistics, Analytics, Supplies.\n\n\
                         Use /help to see available commands.",
                    )
                    .await?;
                } else {
                    self.engine.set_token(tenant, token).await?;
                    info!(tenant, "API token updated");
                    bot.send_message(chat, "✅ Token saved. Try /coefficients or /auto.")
                        .await?;
                }
            }

            Command::Coefficients => self.spawn_manual(tenant, MonitorKind::Coefficients),
            Command::Stock => self.spawn_manual(tenant, MonitorKind::Stock),
            Command::Auto => self.start_auto(bot, chat, MonitorKind::Coefficients).await?,
            Command::Autostock => self.start_auto(bot, chat, MonitorKind::Stock).await?,
            Command::Stop => self.stop_auto(bot, chat, MonitorKind::Coefficients).await?,
            Command::Stopstock => self.stop_auto(bot, chat, MonitorKind::Stock).await?,

            Command::Sales(value) => match SalesPeriod::parse(&value) {
                Some(period) => self.spawn_report(tenant, Report::Sales(period)),
                None => {
                    bot.send_message(chat, "Usage: /sales day|week").await?;
                }
            },
            Command::Promotions => self.spawn_report(tenant, Report::Promotions),

            Command::Targets(value) => match parse_ids(&value, "all") {
                Some(ids) => {
                    self.engine.set_targets(tenant, &ids).await?;
                    bot.send_message(chat, format!("🎯 Tracking: {}", format_ids(&ids, "all warehouses")))
                        .await?;
                }
                None => {
                    bot.send_message(chat, "Usage: /targets 507,117986 (or 'all')").await?;
                }
            },

            Command::Exclude(value) => match parse_ids(&value, "clear") {
                Some(ids) => {
                    self.engine
                        .update(tenant, &[TenantChange::SetExcluded(ids.clone())])
                        .await?;
                    bot.send_message(chat, format!("🚫 Excluded: {}", format_ids(&ids, "none")))
                        .await?;
                }
                None => {
                    bot.send_message(chat, "Usage: /exclude 204939,324108 (or 'clear')").await?;
                }
            },

            Command::Range(value) => match parse_range(&value) {
                Some((min, max)) => {
                    self.engine
                        .update(tenant, &[TenantChange::SetCoefficientRange { min, max }])
                        .await?;
                    bot.send_message(
                        chat,
                        format!("📏 Coefficient range: {}..{}", format_number(min), format_number(max)),
                    )
                    .await?;
                }
                None => {
                    bot.send_message(chat, "Usage: /range <min> <max>\nExample: /range 0 6").await?;
                }
            },

            Command::Interval(value) => match parse_interval(&value) {
                Some((kind, minutes)) => {
                    let restarted = self.engine.set_interval(tenant, kind, minutes).await?;
                    let mut text = format!("⏱ {kind} interval: {minutes} min.");
                    if restarted {
                        text.push_str(" The running job was restarted.");
                    }
                    bot.send_message(chat, text).await?;
                }
                None => {
                    bot.send_message(
                        chat,
                        "Usage: /interval <coefficients|stock> <minutes>\nExample: /interval stock 60",
                    )
                    .await?;
                }
            },

            Command::Hours(value) => match parse_hours(&value) {
                Some(hours) => {
                    self.engine
                        .update(tenant, &[TenantChange::SetWorkingHours(hours)])
                        .await?;
                    bot.send_message(chat, format!("🕘 Working hours: {}", format_hours(hours)))
                        .await?;
                }
                None => {
                    bot.send_message(chat, "Usage: /hours <start> <end>\nExample: /hours 9 22 (or 'off')")
                        .await?;
                }
            },

            Command::Config => {
                let config = self.engine.effective_config(tenant).await?;
                let running: Vec<MonitorKind> = MonitorKind::ALL
                    .into_iter()
                    .filter(|kind| self.engine.registry().is_running(tenant, *kind))
                    .collect();
                bot.send_message(chat, render_config(&config, &running)).await?;
            }

            Command::Help => {
                bot.send_message(chat, Command::descriptions().to_string()).await?;
            }
        }
        Ok(())
    }

    async fn handle_callback(&self, bot: Bot, q: CallbackQuery) -> Result<(), TelegramError> {
        let tenant = ChatId::from(q.from.id).0;

        let answer = match q.data.as_deref().and_then(Callback::decode) {
            Some(Callback::Silence(ids)) => match self.engine.silence_warehouses(tenant, &ids).await {
                Ok(()) => "🔕 Silenced until tomorrow morning".to_string(),
                Err(e) => {
                    error!(tenant, error = %e, "Silence failed");
                    e.user_message()
                }
            },
            Some(Callback::Stop(kind)) => match self.engine.stop(tenant, kind).await {
                Ok(true) => "⛔ Tracking stopped".to_string(),
                Ok(false) => "Tracking is not running".to_string(),
                Err(e) => {
                    error!(tenant, error = %e, "Stop failed");
                    e.user_message()
                }
            },
            None => "Unknown action".to_string(),
        };

        bot.answer_callback_query(q.id.clone()).text(answer).await?;
        Ok(())
    }
}

/// Comma or space separated warehouse ids. `reset_word` (or an empty
/// argument) means an empty list.
fn parse_ids(value: &str, reset_word: &str) -> Option<Vec<WarehouseId>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(reset_word) {
        return Some(Vec::new());
    }
    let mut ids = Vec::new();
    for part in value.split(|c: char| c == ',' || c.is_whitespace()) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: WarehouseId = part.parse().ok()?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Some(ids)
}

fn parse_range(value: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = value
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|s| !s.is_empty())
        .collect();
    let (min, max) = match parts.as_slice() {
        [min, max] => (*min, *max),
        // "0-6"; a leading minus belongs to the first number
        [single] => {
            let at = single.get(1..)?.find('-')? + 1;
            (&single[..at], &single[at + 1..])
        }
        _ => return None,
    };
    let min: f64 = min.replace(',', ".").parse().ok()?;
    let max: f64 = max.replace(',', ".").parse().ok()?;
    (min.is_finite() && max.is_finite() && min <= max).then_some((min, max))
}

fn parse_interval(value: &str) -> Option<(MonitorKind, u32)> {
    let mut parts = value.split_whitespace();
    let kind = MonitorKind::parse(parts.next()?)?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(1..=24 * 60).contains(&minutes) {
        return None;
    }
    Some((kind, minutes))
}

fn parse_hours(value: &str) -> Option<WorkingHours> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("off") {
        return Some(WorkingHours::UNRESTRICTED);
    }
    let parts: Vec<u32> = value
        .split(|c: char| c == '-' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    let [start, end] = parts.as_slice() else {
        return None;
    };
    (*start < 24 && *end <= 24).then_some(WorkingHours {
        start: *start,
        end: *end,
    })
}

fn format_ids(ids: &[WarehouseId], empty: &str) -> String {
    if ids.is_empty() {
        return empty.to_string();
    }
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn format_hours(hours: WorkingHours) -> String {
    if hours.is_unrestricted() {
        "around the clock".to_string()
    } else {
        format!("{:02}:00-{:02}:00", hours.start, hours.end)
    }
}

/// Plain-text summary of a tenant's effective settings.
pub fn render_config(config: &EffectiveConfig, running: &[MonitorKind]) -> String {
    let mut text = String::from("⚙️ Current configuration\n\n");
    let auto = |kind: MonitorKind| {
        if running.contains(&kind) {
            format!("on, every {} min", config.intervals.for_kind(kind))
        } else {
            "off".to_string()
        }
    };
    let _ = writeln!(text, "Coefficients: {}", auto(MonitorKind::Coefficients));
    let _ = writeln!(text, "Stock: {}", auto(MonitorKind::Stock));
    let _ = writeln!(
        text,
        "Range: {}..{}",
        format_number(config.thresholds.min_coefficient),
        format_number(config.thresholds.max_coefficient)
    );
    let _ = writeln!(text, "Low stock at: {}", config.thresholds.low_stock);
    let _ = writeln!(text, "Targets: {}", format_ids(&config.warehouses.target, "all warehouses"));
    let _ = writeln!(text, "Excluded: {}", format_ids(&config.warehouses.excluded, "none"));
    let _ = writeln!(text, "Paused: {}", format_ids(&config.warehouses.paused, "none"));
    let _ = write!(text, "Working hours: {}", format_hours(config.working_hours));
    text
}
