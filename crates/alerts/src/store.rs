//! Collaborator seams for settings and credentials, plus an in-memory backend.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use slotwatch_core::{GlobalDefaults, TenantChange, TenantDoc, TenantId};
use std::sync::{Mutex, RwLock};

/// One global-defaults document and one document per tenant.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_global(&self) -> Result<Option<GlobalDefaults>, StoreError>;

    async fn put_global(&self, defaults: &GlobalDefaults) -> Result<(), StoreError>;

    async fn get_tenant(&self, tenant: TenantId) -> Result<Option<TenantDoc>, StoreError>;

    /// Store `doc` unless the tenant already has one. Returns the stored document.
    async fn create_tenant_if_absent(&self, doc: TenantDoc) -> Result<TenantDoc, StoreError>;

    /// Apply `changes` to an existing document in one atomic step.
    async fn upsert_tenant(
        &self,
        tenant: TenantId,
        changes: &[TenantChange],
        now: DateTime<Utc>,
    ) -> Result<TenantDoc, StoreError>;

    async fn list_tenants(&self) -> Result<Vec<TenantDoc>, StoreError>;

    /// Append an entry to the tenant's activity log.
    async fn log_activity(
        &self,
        tenant: TenantId,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// API tokens per tenant.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_token(&self, tenant: TenantId) -> Result<Option<String>, StoreError>;

    async fn set_token(&self, tenant: TenantId, token: &str) -> Result<(), StoreError>;
}

/// Process-local store. Used in tests and when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    global: RwLock<Option<GlobalDefaults>>,
    tenants: DashMap<TenantId, TenantDoc>,
    tokens: DashMap<TenantId, String>,
    activity: Mutex<Vec<(TenantId, String, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with global defaults.
    pub fn with_defaults(defaults: GlobalDefaults) -> Self {
        let store = Self::default();
        *store.global.write().unwrap_or_else(|p| p.into_inner()) = Some(defaults);
        store
    }

    /// Logged actions for a tenant, oldest first.
    pub fn activity(&self, tenant: TenantId) -> Vec<String> {
        self.activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(t, _, _)| *t == tenant)
            .map(|(_, action, _)| action.clone())
            .collect()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_global(&self) -> Result<Option<GlobalDefaults>, StoreError> {
        Ok(self.global.read().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn put_global(&self, defaults: &GlobalDefaults) -> Result<(), StoreError> {
        *self.global.write().unwrap_or_else(|p| p.into_inner()) = Some(defaults.clone());
        Ok(())
    }

    async fn get_tenant(&self, tenant: TenantId) -> Result<Option<TenantDoc>, StoreError> {
        Ok(self.tenants.get(&tenant).map(|doc| doc.value().clone()))
    }

    async fn create_tenant_if_absent(&self, doc: TenantDoc) -> Result<TenantDoc, StoreError> {
        Ok(self.tenants.entry(doc.tenant_id).or_insert(doc).value().clone())
    }

    async fn upsert_tenant(
        &self,
        tenant: TenantId,
        changes: &[TenantChange],
        now: DateTime<Utc>,
    ) -> Result<TenantDoc, StoreError> {
        let mut doc = self
            .tenants
            .get_mut(&tenant)
            .ok_or(StoreError::TenantNotFound(tenant))?;
        for change in changes {
            doc.apply(change);
        }
        doc.updated_at = now;
        Ok(doc.value().clone())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantDoc>, StoreError> {
        let mut docs: Vec<TenantDoc> = self.tenants.iter().map(|e| e.value().clone()).collect();
        docs.sort_by_key(|doc| doc.tenant_id);
        Ok(docs)
    }

    async fn log_activity(
        &self,
        tenant: TenantId,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((tenant, action.to_string(), at));
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_token(&self, tenant: TenantId) -> Result<Option<String>, StoreError> {
        Ok(self.tokens.get(&tenant).map(|t| t.value().clone()))
    }

    async fn set_token(&self, tenant: TenantId, token: &str) -> Result<(), StoreError> {
        self.tokens.insert(tenant, token.to_string());
        Ok(())
    }
}
