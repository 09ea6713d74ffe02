//! Core data types for the warehouse-acceptance monitor.

pub mod clock;
pub mod config;
pub mod record;
pub mod settings;
pub mod tenant;

pub use clock::*;
pub use config::*;
pub use record::*;
pub use settings::*;
pub use tenant::*;
