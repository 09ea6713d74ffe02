//! Message delivery seam with split-and-retry fallback.

use crate::error::DeliveryError;
use async_trait::async_trait;
use slotwatch_core::TenantId;
use slotwatch_engine::{split_for_retry, Control, Message};
use tracing::{error, warn};

/// Outbound transport for tenant messages.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(
        &self,
        tenant: TenantId,
        text: &str,
        controls: &[Control],
    ) -> Result<(), DeliveryError>;
}

/// Outcome of delivering a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Send every message in order.
///
/// A message that fails is re-split into smaller parts and each part is
/// tried once; controls stay on the last part. Failures never stop the
/// remaining messages.
pub async fn deliver_all(
    delivery: &dyn Delivery,
    tenant: TenantId,
    messages: &[Message],
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for message in messages {
        match delivery.send(tenant, &message.text, &message.controls).await {
            Ok(()) => {
                report.sent += 1;
                continue;
            }
            Err(e) => warn!(tenant, error = %e, "Delivery failed, retrying in smaller parts"),
        }

        let parts = split_for_retry(&message.text);
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.iter().enumerate() {
            let controls: &[Control] = if i == last { &message.controls } else { &[] };
            match delivery.send(tenant, part, controls).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    error!(tenant, part = i + 1, parts = parts.len(), error = %e, "Failed to deliver message part");
                    report.failed += 1;
                }
            }
        }
    }
    report
}
