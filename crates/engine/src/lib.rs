//! Monitoring pipeline stages.
//!
//! Pure functions over an [`slotwatch_core::EffectiveConfig`] snapshot:
//! filtering and grouping of raw records, tariff bands, pause decisions,
//! message composition and the on-demand reports. No I/O happens here.

pub mod aggregation;
pub mod compose;
pub mod pause;
pub mod report;
pub mod stock;
pub mod tariff;

pub use aggregation::*;
pub use compose::*;
pub use pause::*;
pub use report::*;
pub use stock::*;
pub use tariff::*;
