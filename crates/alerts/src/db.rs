//! SQLite-backed settings, credential and activity storage.
//!
//! Settings documents are stored as JSON text, one row per tenant, so the
//! document shape can evolve without schema migrations.

use crate::error::StoreError;
use crate::store::{CredentialStore, SettingsStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use slotwatch_core::{GlobalDefaults, TenantChange, TenantDoc, TenantId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Database connection for settings and tokens.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to SQLite database at the given URL and create tables.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // every in-memory connection is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS global_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenant_settings (
                tenant_id INTEGER PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                tenant_id INTEGER PRIMARY KEY,
                token TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_activity_tenant
            ON activity_log(tenant_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent actions for a tenant, newest first.
    pub async fn recent_activity(
        &self,
        tenant: TenantId,
        limit: i64,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT action, created_at FROM activity_log WHERE tenant_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(tenant)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete activity older than `days`.
    pub async fn cleanup_old_activity(&self, days: i64, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = (now - chrono::Duration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM activity_log WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SettingsStore for Database {
    async fn get_global(&self) -> Result<Option<GlobalDefaults>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT document FROM global_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn put_global(&self, defaults: &GlobalDefaults) -> Result<(), StoreError> {
        let json = serde_json::to_string(defaults)?;
        sqlx::query(
            r#"
            INSERT INTO global_settings (id, document, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at
            "#,
        )
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, tenant: TenantId) -> Result<Option<TenantDoc>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT document FROM tenant_settings WHERE tenant_id = ?",
        )
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn create_tenant_if_absent(&self, doc: TenantDoc) -> Result<TenantDoc, StoreError> {
        let json = serde_json::to_string(&doc)?;
        sqlx::query(
            "INSERT OR IGNORE INTO tenant_settings (tenant_id, document, updated_at) VALUES (?, ?, ?)",
        )
        .bind(doc.tenant_id)
        .bind(json)
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_tenant(doc.tenant_id)
            .await?
            .ok_or(StoreError::TenantNotFound(doc.tenant_id))
    }

    async fn upsert_tenant(
        &self,
        tenant: TenantId,
        changes: &[TenantChange],
        now: DateTime<Utc>,
    ) -> Result<TenantDoc, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (json,) = sqlx::query_as::<_, (String,)>(
            "SELECT document FROM tenant_settings WHERE tenant_id = ?",
        )
        .bind(tenant)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::TenantNotFound(tenant))?;

        let mut doc: TenantDoc = serde_json::from_str(&json)?;
        for change in changes {
            doc.apply(change);
        }
        doc.updated_at = now;

        sqlx::query("UPDATE tenant_settings SET document = ?, updated_at = ? WHERE tenant_id = ?")
            .bind(serde_json::to_string(&doc)?)
            .bind(now.to_rfc3339())
            .bind(tenant)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(doc)
    }

    async fn list_tenants(&self) -> Result<Vec<TenantDoc>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT document FROM tenant_settings ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }

    async fn log_activity(
        &self,
        tenant: TenantId,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO activity_log (tenant_id, action, created_at) VALUES (?, ?, ?)")
            .bind(tenant)
            .bind(action)
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn get_token(&self, tenant: TenantId) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT token FROM credentials WHERE tenant_id = ?")
            .bind(tenant)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(token,)| token))
    }

    async fn set_token(&self, tenant: TenantId, token: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (tenant_id, token) VALUES (?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET token = excluded.token, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(tenant)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
