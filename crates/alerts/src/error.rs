//! Error types for stores, delivery and the monitoring pipeline.

use slotwatch_core::TenantId;
use slotwatch_feeds::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Malformed settings document: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Tenant not found: {0}")]
    TenantNotFound(TenantId),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// Tick-level failures. Each is caught at the tick boundary.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Global defaults (or the tenant document) are missing and cannot be created.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("no API token stored for tenant {0}")]
    CredentialMissing(TenantId),

    /// Upstream failed for good (retries exhausted or request rejected).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] ApiError),

    #[error("{requested} target warehouses requested, at most {limit} allowed")]
    TooManyTargets { requested: usize, limit: usize },

    #[error("{failed} of {total} messages could not be delivered")]
    PartialDeliveryFailure { failed: usize, total: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MonitorError {
    /// Whether the tenant should be told about this error.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MonitorError::ConfigMissing(_)
                | MonitorError::CredentialMissing(_)
                | MonitorError::UpstreamUnavailable(_)
                | MonitorError::TooManyTargets { .. }
        )
    }

    /// The single message shown to the tenant.
    pub fn user_message(&self) -> String {
        match self {
            MonitorError::ConfigMissing(_) => {
                "⚠️ Monitoring is not configured yet. Please contact the administrator.".to_string()
            }
            MonitorError::CredentialMissing(_) => "❌ API token not found. Add it with /start <token>. \
                 Required scopes: Statistics, Analytics, Supplies."
                .to_string(),
            MonitorError::UpstreamUnavailable(ApiError::Rejected { status, .. })
                if *status == 401 || *status == 403 =>
            {
                format!("❌ The marketplace rejected your API token (HTTP {status}). Update it with /start <token>.")
            }
            MonitorError::UpstreamUnavailable(ApiError::Rejected { status, .. }) => {
                format!("❌ The marketplace rejected the request (HTTP {status}).")
            }
            MonitorError::UpstreamUnavailable(_) => {
                "❌ The marketplace API is unavailable right now. Please try again later.".to_string()
            }
            MonitorError::TooManyTargets { limit, .. } => {
                format!("⚠️ You can track at most {limit} warehouses.")
            }
            MonitorError::PartialDeliveryFailure { .. } | MonitorError::Store(_) => {
                "❌ Internal error, please try again later.".to_string()
            }
        }
    }
}
