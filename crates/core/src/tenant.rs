//! Tenant identifiers, monitoring kinds and trigger kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tenant id (the chat/user id on the transport side).
pub type TenantId = i64;

/// Upstream warehouse id.
pub type WarehouseId = i64;

/// What a scheduled job watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// Acceptance coefficients per warehouse and date.
    Coefficients,
    /// Remaining stock per article.
    Stock,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 2] = [MonitorKind::Coefficients, MonitorKind::Stock];

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorKind::Coefficients => "coefficients",
            MonitorKind::Stock => "stock",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "coefficients" | "coef" | "c" => Some(MonitorKind::Coefficients),
            "stock" | "s" => Some(MonitorKind::Stock),
            _ => None,
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tick is running.
///
/// Scheduled ticks honour working hours, the all-paused short-circuit and the
/// "no data" suppression, and carry interactive controls. Manual ticks always
/// deliver something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

impl TriggerKind {
    #[inline]
    pub fn is_scheduled(self) -> bool {
        matches!(self, TriggerKind::Scheduled)
    }
}
