//! Settings resolver: global defaults + tenant overrides -> effective config.

use crate::error::MonitorError;
use crate::store::SettingsStore;
use slotwatch_core::{Clock, EffectiveConfig, GlobalDefaults, TenantDoc, TenantId};
use std::sync::Arc;
use tracing::info;

pub struct SettingsResolver {
    store: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl SettingsResolver {
    pub fn new(store: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn global(&self) -> Result<GlobalDefaults, MonitorError> {
        self.store
            .get_global()
            .await?
            .ok_or_else(|| MonitorError::ConfigMissing("global defaults".to_string()))
    }

    /// Global defaults and the tenant's document, creating the document on first use.
    pub async fn ensure_tenant(
        &self,
        tenant: TenantId,
    ) -> Result<(GlobalDefaults, TenantDoc), MonitorError> {
        let global = self.global().await?;
        let doc = match self.store.get_tenant(tenant).await? {
            Some(doc) => doc,
            None => {
                info!(tenant, "Creating settings for new tenant");
                let fresh = TenantDoc::new(tenant, &global, self.clock.now());
                self.store.create_tenant_if_absent(fresh).await?
            }
        };
        Ok((global, doc))
    }

    /// Fresh effective configuration for one tick.
    pub async fn resolve(&self, tenant: TenantId) -> Result<EffectiveConfig, MonitorError> {
        let (global, doc) = self.ensure_tenant(tenant).await?;
        Ok(EffectiveConfig::merge(&global, &doc))
    }
}
