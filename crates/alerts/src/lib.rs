//! Collaborator seams and orchestration for the monitoring engine.
//!
//! This crate provides:
//! - Settings and credential stores (SQLite and in-memory)
//! - The settings resolver and the job registry
//! - The monitoring engine that drives each tick
//! - Telegram delivery and bot command handlers

pub mod db;
pub mod delivery;
pub mod error;
pub mod monitor;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod telegram;

pub use db::Database;
pub use delivery::{deliver_all, Delivery, DeliveryReport};
pub use error::{DeliveryError, MonitorError, StoreError};
pub use monitor::{EngineParts, MonitoringEngine, Report, TickOutcome};
pub use resolver::SettingsResolver;
pub use scheduler::{JobKey, JobRegistry, TickHandler};
pub use store::{CredentialStore, MemoryStore, SettingsStore};
pub use telegram::{TelegramBot, TelegramDelivery};
