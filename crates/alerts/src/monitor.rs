//! Monitoring engine: the entry point collaborators call, and the tick pipeline.
//!
//! Per tick: resolve settings, gate on working hours, settle pauses, fetch,
//! aggregate, compose, deliver, record. Every error is caught at the tick
//! boundary, logged, and surfaced to the tenant at most once; the job keeps
//! running either way.

use crate::delivery::{deliver_all, Delivery};
use crate::error::MonitorError;
use crate::resolver::SettingsResolver;
use crate::scheduler::{JobRegistry, TickHandler};
use crate::store::{CredentialStore, SettingsStore};
use async_trait::async_trait;
use slotwatch_core::{
    Clock, EffectiveConfig, MonitorKind, TenantChange, TenantDoc, TenantId, TriggerKind,
    WarehouseId, MAX_TARGETS,
};
use slotwatch_engine::{
    aggregate, compose_promotions, compose_sales, compose_stock, evaluate, resolve_names,
    summarize, Compositor, Message, PauseDecision, SalesPeriod,
};
use slotwatch_feeds::UpstreamApi;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Scheduled tick outside the tenant's working hours.
    OutsideWorkingHours,
    /// Every target warehouse is paused; nothing was fetched.
    AllTargetsPaused,
    /// Scheduled tick with nothing worth sending.
    NoData,
    /// Messages handed to the delivery collaborator.
    Delivered { messages: usize },
}

/// On-demand reports, run once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Sales(SalesPeriod),
    Promotions,
}

impl Report {
    fn action(&self) -> String {
        match self {
            Report::Sales(period) => format!("sales_{}_requested", period.as_str()),
            Report::Promotions => "promotions_requested".to_string(),
        }
    }
}

/// Collaborators the engine is built from.
pub struct EngineParts {
    pub settings: Arc<dyn SettingsStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub api: UpstreamApi,
    pub delivery: Arc<dyn Delivery>,
    pub clock: Arc<dyn Clock>,
}

pub struct MonitoringEngine {
    resolver: SettingsResolver,
    settings: Arc<dyn SettingsStore>,
    credentials: Arc<dyn CredentialStore>,
    api: UpstreamApi,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
    registry: JobRegistry,
    compositor: Compositor,
}

impl MonitoringEngine {
    pub fn new(parts: EngineParts) -> Arc<Self> {
        Arc::new(Self {
            resolver: SettingsResolver::new(parts.settings.clone(), parts.clock.clone()),
            settings: parts.settings,
            credentials: parts.credentials,
            api: parts.api,
            delivery: parts.delivery,
            clock: parts.clock,
            registry: JobRegistry::new(),
            compositor: Compositor::default(),
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start (or restart) automatic monitoring. Returns the interval in use.
    ///
    /// The auto flag is persisted before the job is spawned, so a failed
    /// write leaves no job behind.
    pub async fn start(self: &Arc<Self>, tenant: TenantId, kind: MonitorKind) -> Result<Duration, MonitorError> {
        let config = self.resolver.resolve(tenant).await?;
        let interval = config.interval(kind);

        self.update(tenant, &[TenantChange::SetAuto { kind, enabled: true }])
            .await?;
        self.spawn_job(tenant, kind, interval);
        self.log(tenant, &format!("start_{kind}")).await;
        Ok(interval)
    }

    /// Stop automatic monitoring. Returns whether a job was running.
    ///
    /// Stopping coefficients also clears the target and paused selections.
    pub async fn stop(&self, tenant: TenantId, kind: MonitorKind) -> Result<bool, MonitorError> {
        if !self.registry.stop(tenant, kind) {
            return Ok(false);
        }

        let mut changes = vec![TenantChange::SetAuto { kind, enabled: false }];
        if kind == MonitorKind::Coefficients {
            changes.push(TenantChange::SetTarget(Vec::new()));
            changes.push(TenantChange::ClearPaused);
        }
        self.update(tenant, &changes).await?;
        self.log(tenant, &format!("stop_{kind}")).await;
        Ok(true)
    }

    /// Manual tick: bypasses working hours and the all-paused short-circuit.
    /// Errors are surfaced to the tenant and also returned.
    pub async fn run_once(&self, tenant: TenantId, kind: MonitorKind) -> Result<TickOutcome, MonitorError> {
        self.handle_tick(tenant, kind, TriggerKind::Manual).await
    }

    /// Fetch and deliver a report. Errors are surfaced to the tenant and
    /// also returned.
    pub async fn run_report(&self, tenant: TenantId, report: Report) -> Result<TickOutcome, MonitorError> {
        let result = self.report(tenant, report).await;
        if let Err(e) = &result {
            error!(tenant, ?report, error = %e, "Report failed");
            self.surface(tenant, e).await;
        }
        result
    }

    /// Replace the target set. At most [`MAX_TARGETS`] warehouses.
    pub async fn set_targets(&self, tenant: TenantId, ids: &[WarehouseId]) -> Result<(), MonitorError> {
        if ids.len() > MAX_TARGETS {
            return Err(MonitorError::TooManyTargets {
                requested: ids.len(),
                limit: MAX_TARGETS,
            });
        }
        self.update(tenant, &[TenantChange::SetTarget(ids.to_vec())])
            .await?;
        Ok(())
    }

    /// Pause the named warehouses until the next working day.
    /// Returns the ids that were resolved from the names.
    pub async fn silence_until_tomorrow(
        &self,
        tenant: TenantId,
        names: &[String],
    ) -> Result<Vec<WarehouseId>, MonitorError> {
        let config = self.resolver.resolve(tenant).await?;
        let ids = resolve_names(names, &config.known_warehouses);
        if ids.is_empty() {
            warn!(tenant, ?names, "Silence request matched no known warehouse");
            return Ok(ids);
        }
        self.silence_warehouses(tenant, &ids).await?;
        Ok(ids)
    }

    /// Pause warehouses by id until the next working day (button clicks).
    pub async fn silence_warehouses(&self, tenant: TenantId, ids: &[WarehouseId]) -> Result<(), MonitorError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.update(
            tenant,
            &[TenantChange::Pause {
                ids: ids.to_vec(),
                at: self.clock.now(),
            }],
        )
        .await?;
        self.log(tenant, "silence_until_tomorrow").await;
        info!(tenant, ?ids, "Warehouses silenced until tomorrow");
        Ok(())
    }

    /// Persist a new interval; a live job is replaced so it takes effect now.
    /// Returns true if a job was restarted.
    pub async fn set_interval(
        self: &Arc<Self>,
        tenant: TenantId,
        kind: MonitorKind,
        minutes: u32,
    ) -> Result<bool, MonitorError> {
        self.update(tenant, &[TenantChange::SetInterval { kind, minutes }])
            .await?;
        if !self.registry.is_running(tenant, kind) {
            return Ok(false);
        }
        let config = self.resolver.resolve(tenant).await?;
        self.spawn_job(tenant, kind, config.interval(kind));
        Ok(true)
    }

    /// Re-create jobs for every tenant with an auto flag set.
    pub async fn restore_jobs(self: &Arc<Self>) -> Result<usize, MonitorError> {
        let global = self.resolver.global().await?;
        let mut restored = 0;
        for doc in self.settings.list_tenants().await? {
            let config = EffectiveConfig::merge(&global, &doc);
            for kind in doc.state.auto.iter().copied() {
                self.spawn_job(doc.tenant_id, kind, config.interval(kind));
                restored += 1;
            }
        }
        info!(restored, "Restored monitoring jobs");
        Ok(restored)
    }

    /// Apply settings changes, creating the tenant document first if needed.
    pub async fn update(&self, tenant: TenantId, changes: &[TenantChange]) -> Result<TenantDoc, MonitorError> {
        self.resolver.ensure_tenant(tenant).await?;
        Ok(self
            .settings
            .upsert_tenant(tenant, changes, self.clock.now())
            .await?)
    }

    pub async fn effective_config(&self, tenant: TenantId) -> Result<EffectiveConfig, MonitorError> {
        self.resolver.resolve(tenant).await
    }

    pub async fn set_token(&self, tenant: TenantId, token: &str) -> Result<(), MonitorError> {
        self.credentials.set_token(tenant, token).await?;
        self.resolver.ensure_tenant(tenant).await?;
        self.log(tenant, "set_token").await;
        Ok(())
    }

    /// Cancel every job (process shutdown).
    pub fn shutdown(&self) -> usize {
        self.registry.stop_all()
    }

    fn spawn_job(self: &Arc<Self>, tenant: TenantId, kind: MonitorKind, interval: Duration) {
        let handler: Arc<dyn TickHandler> = self.clone();
        self.registry.start(tenant, kind, interval, handler);
    }

    async fn log(&self, tenant: TenantId, action: &str) {
        if let Err(e) = self.settings.log_activity(tenant, action, self.clock.now()).await {
            warn!(tenant, action, error = %e, "Failed to record activity");
        }
    }

    /// Tick boundary: run the pipeline and surface any failure once.
    async fn handle_tick(
        &self,
        tenant: TenantId,
        kind: MonitorKind,
        trigger: TriggerKind,
    ) -> Result<TickOutcome, MonitorError> {
        let result = match kind {
            MonitorKind::Coefficients => self.coefficients_tick(tenant, trigger).await,
            MonitorKind::Stock => self.stock_tick(tenant, trigger).await,
        };

        match &result {
            Ok(outcome) => debug!(tenant, kind = %kind, ?trigger, ?outcome, "Tick finished"),
            Err(e) => {
                error!(tenant, kind = %kind, ?trigger, error = %e, "Tick failed");
                self.surface(tenant, e).await;
            }
        }
        result
    }

    /// Tell the tenant about a user-facing error.
    async fn surface(&self, tenant: TenantId, e: &MonitorError) {
        if !e.is_user_facing() {
            return;
        }
        if let Err(send_err) = self.delivery.send(tenant, &e.user_message(), &[]).await {
            warn!(tenant, error = %send_err, "Failed to report error");
        }
    }

    async fn report(&self, tenant: TenantId, report: Report) -> Result<TickOutcome, MonitorError> {
        let config = self.resolver.resolve(tenant).await?;
        let token = self.token(tenant).await?;
        self.log(tenant, &report.action()).await;

        let messages = match report {
            Report::Sales(period) => {
                self.progress(tenant, TriggerKind::Manual, "🔄 Collecting sales...")
                    .await;
                let today = config.local(self.clock.now()).date_naive();
                let (begin, end) = period.range(today);
                let cards = self
                    .api
                    .fetch_sales(&config.api.urls.sales, &token, begin, end)
                    .await?;
                compose_sales(&cards, period, today, &self.compositor)
            }
            Report::Promotions => {
                let url = &config.api.urls.promotion_count;
                if url.trim().is_empty() {
                    return Err(MonitorError::ConfigMissing("promotion_count URL".into()));
                }
                self.progress(tenant, TriggerKind::Manual, "🔄 Loading campaigns...")
                    .await;
                let count = self.api.fetch_promotions(url, &token).await?;
                compose_promotions(&count, &self.compositor)
            }
        };
        self.deliver(tenant, TriggerKind::Manual, &messages).await
    }

    /// Resolve config and apply the working-hours gate.
    async fn prepare(
        &self,
        tenant: TenantId,
        kind: MonitorKind,
        trigger: TriggerKind,
    ) -> Result<Option<EffectiveConfig>, MonitorError> {
        let config = self.resolver.resolve(tenant).await?;
        if trigger.is_scheduled() && !config.is_working_time(self.clock.now()) {
            debug!(tenant, kind = %kind, "Outside working hours, skipping");
            return Ok(None);
        }
        Ok(Some(config))
    }

    async fn token(&self, tenant: TenantId) -> Result<String, MonitorError> {
        self.credentials
            .get_token(tenant)
            .await?
            .filter(|t| !t.trim().is_empty())
            .ok_or(MonitorError::CredentialMissing(tenant))
    }

    async fn progress(&self, tenant: TenantId, trigger: TriggerKind, text: &str) {
        if trigger.is_scheduled() {
            return;
        }
        if let Err(e) = self.delivery.send(tenant, text, &[]).await {
            warn!(tenant, error = %e, "Failed to send progress message");
        }
    }

    async fn coefficients_tick(
        &self,
        tenant: TenantId,
        trigger: TriggerKind,
    ) -> Result<TickOutcome, MonitorError> {
        let Some(mut config) = self.prepare(tenant, MonitorKind::Coefficients, trigger).await? else {
            return Ok(TickOutcome::OutsideWorkingHours);
        };

        let now = self.clock.now();
        match evaluate(&config, now, trigger) {
            PauseDecision::Proceed => {}
            PauseDecision::Reset => {
                self.update(tenant, &[TenantChange::ClearPaused]).await?;
                config.warehouses.paused.clear();
                config.paused_at = None;
                info!(tenant, "Pause expired, all warehouses active again");
            }
            PauseDecision::SkipAllPaused => {
                info!(tenant, "All target warehouses are paused, skipping check");
                return Ok(TickOutcome::AllTargetsPaused);
            }
        }

        let token = self.token(tenant).await?;
        self.progress(tenant, trigger, "🔄 Fetching warehouse coefficients...")
            .await;

        let records = self
            .api
            .fetch_coefficients(&config.api.urls.coefficients, &token)
            .await?;
        let today = config.local(now).date_naive();
        let tariffs = match self.api.fetch_tariffs(&config.api.urls.tariffs, &token, today).await {
            Ok(tariffs) => tariffs,
            Err(e) => {
                warn!(tenant, error = %e, "Tariffs unavailable, continuing without them");
                Vec::new()
            }
        };

        let aggregation = aggregate(&records, &tariffs, &config);
        debug!(
            tenant,
            records = records.len(),
            groups = aggregation.view.len(),
            has_data = aggregation.has_data,
            "Aggregated coefficients"
        );

        if !aggregation.target_ids.is_empty() {
            let names = aggregation
                .target_ids
                .iter()
                .map(|(name, id)| (name.clone(), *id))
                .collect();
            self.update(tenant, &[TenantChange::RememberWarehouses(names)])
                .await?;
        }

        if trigger.is_scheduled() && !aggregation.has_data {
            debug!(tenant, "No matching slots, nothing to send");
            return Ok(TickOutcome::NoData);
        }

        let messages = self.compositor.compose(&aggregation, trigger);
        self.deliver(tenant, trigger, &messages).await
    }

    async fn stock_tick(&self, tenant: TenantId, trigger: TriggerKind) -> Result<TickOutcome, MonitorError> {
        let Some(config) = self.prepare(tenant, MonitorKind::Stock, trigger).await? else {
            return Ok(TickOutcome::OutsideWorkingHours);
        };

        let token = self.token(tenant).await?;
        self.progress(tenant, trigger, "🔄 Counting stock...").await;

        let items = self.api.fetch_stock_report(&config.api, &token).await?;
        let summary = summarize(&items, config.thresholds.low_stock);
        let messages = compose_stock(&summary, trigger, &self.compositor);
        if messages.is_empty() {
            return Ok(TickOutcome::NoData);
        }
        self.deliver(tenant, trigger, &messages).await
    }

    async fn deliver(
        &self,
        tenant: TenantId,
        trigger: TriggerKind,
        messages: &[Message],
    ) -> Result<TickOutcome, MonitorError> {
        let report = deliver_all(self.delivery.as_ref(), tenant, messages).await;

        if trigger.is_scheduled() && report.sent > 0 {
            self.update(tenant, &[TenantChange::SetLastNotification(self.clock.now())])
                .await?;
        }
        if !report.is_complete() {
            return Err(MonitorError::PartialDeliveryFailure {
                failed: report.failed,
                total: report.sent + report.failed,
            });
        }
        Ok(TickOutcome::Delivered {
            messages: report.sent,
        })
    }
}

#[async_trait]
impl TickHandler for MonitoringEngine {
    async fn on_tick(&self, tenant: TenantId, kind: MonitorKind) {
        // errors are already logged and surfaced at the tick boundary
        let _ = self.handle_tick(tenant, kind, TriggerKind::Scheduled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::RecordingDelivery;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use slotwatch_core::{GlobalDefaults, ManualClock, WorkingHours};
    use slotwatch_feeds::{ApiClient, ApiError, ApiRequest, ApiResponse, HttpTransport, RetryPolicy};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const TENANT: TenantId = 100;

    /// Serves fixed bodies by URL prefix and counts requests.
    #[derive(Default)]
    struct FakeUpstream {
        routes: Mutex<HashMap<String, (u16, String)>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeUpstream {
        fn route(&self, prefix: &str, status: u16, body: serde_json::Value) {
            self.routes
                .lock()
                .unwrap()
                .insert(prefix.to_string(), (status, body.to_string()));
        }

        fn count(&self, prefix: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|url| url.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeUpstream {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().unwrap().push(request.url.clone());
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                .map(|(_, (status, body))| ApiResponse {
                    status: *status,
                    body: body.clone(),
                })
                .ok_or_else(|| ApiError::ConnectionFailed(format!("no route for {}", request.url)))
        }
    }

    const COEFFS: &str = "https://coeffs";
    const TARIFFS: &str = "https://tariffs";
    const SALES: &str = "https://sales";
    const ADVERTS: &str = "https://adverts";

    struct Harness {
        engine: Arc<MonitoringEngine>,
        store: Arc<MemoryStore>,
        upstream: Arc<FakeUpstream>,
        delivery: Arc<RecordingDelivery>,
        clock: Arc<ManualClock>,
    }

    /// Moscow local time on 2025-03-`day`.
    fn msk(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(id: i64, name: &str, coefficient: f64) -> serde_json::Value {
        json!({
            "warehouseID": id,
            "warehouseName": name,
            "boxTypeName": "Короба",
            "coefficient": coefficient,
            "date": "2025-03-12T00:00:00Z",
            "allowUnload": true,
        })
    }

    async fn harness(at: DateTime<Utc>) -> Harness {
        let mut defaults = GlobalDefaults::default();
        defaults.api.urls.coefficients = COEFFS.to_string();
        defaults.api.urls.tariffs = format!("{TARIFFS}?date={{date_now}}");
        defaults.api.urls.sales = SALES.to_string();
        defaults.api.urls.promotion_count = ADVERTS.to_string();
        defaults.working_hours.start = 9;
        defaults.working_hours.end = 22;

        let store = Arc::new(MemoryStore::with_defaults(defaults));
        store.set_token(TENANT, "token").await.unwrap();

        let upstream = Arc::new(FakeUpstream::default());
        upstream.route(
            COEFFS,
            200,
            json!([record(1, "Коледино", 1.0), record(2, "Казань", 2.0), record(3, "Тула", 9.0)]),
        );
        upstream.route(TARIFFS, 200, json!({"response": {"data": {"warehouseList": []}}}));

        let clock = Arc::new(ManualClock::new(at));
        let client = ApiClient::new(upstream.clone(), clock.clone())
            .with_policy(RetryPolicy::default().without_jitter());
        let delivery = Arc::new(RecordingDelivery::default());

        let engine = MonitoringEngine::new(EngineParts {
            settings: store.clone(),
            credentials: store.clone(),
            api: UpstreamApi::new(Arc::new(client), clock.clone()),
            delivery: delivery.clone(),
            clock: clock.clone(),
        });

        Harness {
            engine,
            store,
            upstream,
            delivery,
            clock,
        }
    }

    impl Harness {
        async fn set(&self, changes: &[TenantChange]) {
            self.engine.update(TENANT, changes).await.unwrap();
        }

        async fn scheduled(&self) -> Result<TickOutcome, MonitorError> {
            self.engine
                .handle_tick(TENANT, MonitorKind::Coefficients, TriggerKind::Scheduled)
                .await
        }

        async fn doc(&self) -> TenantDoc {
            self.store.get_tenant(TENANT).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_scheduled_tick_delivers_with_controls() {
        let h = harness(msk(10, 10, 0)).await;
        h.set(&[TenantChange::SetTarget(vec![1, 2])]).await;

        let outcome = h.scheduled().await.unwrap();

        assert_eq!(outcome, TickOutcome::Delivered { messages: 1 });
        let sent = h.delivery.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Коледино"));
        assert!(!sent[0].1.contains("🏭 Тула"));
        assert_eq!(sent[0].2.len(), 2);

        let doc = h.doc().await;
        assert_eq!(doc.state.last_notification, Some(msk(10, 10, 0)));
        assert_eq!(doc.state.known_warehouses.get("Казань"), Some(&2));
    }

    #[tokio::test]
    async fn test_all_targets_paused_skips_fetch() {
        let h = harness(msk(10, 12, 0)).await;
        h.set(&[
            TenantChange::SetTarget(vec![1, 2]),
            TenantChange::SetLastNotification(msk(10, 10, 0)),
            TenantChange::Pause {
                ids: vec![1, 2],
                at: msk(10, 10, 5),
            },
        ])
        .await;

        assert_eq!(h.scheduled().await.unwrap(), TickOutcome::AllTargetsPaused);
        assert_eq!(h.upstream.count(COEFFS), 0);
        assert!(h.delivery.texts(TENANT).is_empty());
    }

    #[tokio::test]
    async fn test_partial_pause_still_fetches() {
        let h = harness(msk(10, 12, 0)).await;
        h.set(&[
            TenantChange::SetTarget(vec![1, 2]),
            TenantChange::SetLastNotification(msk(10, 10, 0)),
            TenantChange::Pause {
                ids: vec![1],
                at: msk(10, 10, 5),
            },
        ])
        .await;

        h.scheduled().await.unwrap();
        assert_eq!(h.upstream.count(COEFFS), 1);
        let texts = h.delivery.texts(TENANT);
        assert!(!texts[0].contains("Коледино"));
        assert!(texts[0].contains("Казань"));
    }

    #[tokio::test]
    async fn test_pause_expires_next_working_morning() {
        let h = harness(msk(10, 12, 0)).await;
        h.set(&[
            TenantChange::SetTarget(vec![1, 2]),
            TenantChange::SetLastNotification(msk(10, 10, 0)),
            TenantChange::Pause {
                ids: vec![1, 2],
                at: msk(10, 10, 5),
            },
        ])
        .await;

        h.clock.set(msk(11, 8, 59));
        // 08:59 is also outside working hours; the manual path still evaluates expiry
        h.engine.run_once(TENANT, MonitorKind::Coefficients).await.unwrap();
        assert_eq!(h.doc().await.settings.warehouses.paused, Some(vec![1, 2]));

        h.clock.set(msk(11, 9, 0));
        let outcome = h.scheduled().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { .. }));
        assert_eq!(h.doc().await.settings.warehouses.paused, Some(vec![]));
    }

    #[tokio::test]
    async fn test_overnight_pause_lifts_despite_later_notifications() {
        let h = harness(msk(11, 1, 0)).await;
        h.set(&[
            TenantChange::SetWorkingHours(WorkingHours { start: 22, end: 6 }),
            TenantChange::SetTarget(vec![1, 2]),
            TenantChange::SetLastNotification(msk(10, 23, 0)),
            TenantChange::Pause {
                ids: vec![1],
                at: msk(10, 23, 5),
            },
        ])
        .await;

        let outcome = h.scheduled().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { .. }));
        let doc = h.doc().await;
        assert_eq!(doc.state.last_notification, Some(msk(11, 1, 0)));
        assert_eq!(doc.settings.warehouses.paused, Some(vec![1]));

        h.clock.set(msk(11, 22, 0));
        h.scheduled().await.unwrap();
        assert_eq!(h.doc().await.settings.warehouses.paused, Some(vec![]));
    }

    #[tokio::test]
    async fn test_outside_working_hours_is_silent() {
        let h = harness(msk(10, 23, 0)).await;
        assert_eq!(h.scheduled().await.unwrap(), TickOutcome::OutsideWorkingHours);
        assert_eq!(h.upstream.count(COEFFS), 0);

        let outcome = h.engine.run_once(TENANT, MonitorKind::Coefficients).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_scheduled_no_data_is_suppressed_but_manual_reports() {
        let h = harness(msk(10, 10, 0)).await;
        h.set(&[TenantChange::SetCoefficientRange { min: 0.0, max: 0.5 }]).await;

        assert_eq!(h.scheduled().await.unwrap(), TickOutcome::NoData);
        assert!(h.delivery.texts(TENANT).is_empty());

        h.engine.run_once(TENANT, MonitorKind::Coefficients).await.unwrap();
        let texts = h.delivery.texts(TENANT);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("🔄"));
        assert!(texts[1].contains("No acceptance slots"));
    }

    #[tokio::test]
    async fn test_missing_token_is_reported_once() {
        let h = harness(msk(10, 10, 0)).await;
        h.store.set_token(TENANT, "").await.unwrap();

        let err = h.scheduled().await.unwrap_err();
        assert!(matches!(err, MonitorError::CredentialMissing(TENANT)));
        let texts = h.delivery.texts(TENANT);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("/start"));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_surfaced() {
        let h = harness(msk(10, 10, 0)).await;
        h.upstream.route(COEFFS, 503, json!({"error": "busy"}));

        let err = h.scheduled().await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::UpstreamUnavailable(ApiError::UpstreamUnavailable { attempts: 3, .. })
        ));
        assert_eq!(h.upstream.count(COEFFS), 3);
        assert_eq!(h.delivery.texts(TENANT).len(), 1);
    }

    #[tokio::test]
    async fn test_tariff_failure_degrades() {
        let h = harness(msk(10, 10, 0)).await;
        h.upstream.route(TARIFFS, 400, json!({"error": "bad date"}));

        let outcome = h.scheduled().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_silence_maps_names_to_ids() {
        let h = harness(msk(10, 10, 0)).await;
        h.set(&[TenantChange::SetTarget(vec![1, 2])]).await;
        h.scheduled().await.unwrap();

        let ids = h
            .engine
            .silence_until_tomorrow(TENANT, &["Коледино".to_string(), "Нигде".to_string()])
            .await
            .unwrap();

        assert_eq!(ids, vec![1]);
        let doc = h.doc().await;
        assert_eq!(doc.settings.warehouses.paused, Some(vec![1]));
        assert_eq!(doc.state.paused_at, Some(msk(10, 10, 0)));
        assert!(h.store.activity(TENANT).contains(&"silence_until_tomorrow".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_one_job_and_stop_clears_selection() {
        let h = harness(msk(10, 10, 0)).await;
        h.set(&[TenantChange::SetTarget(vec![1])]).await;

        h.engine.start(TENANT, MonitorKind::Coefficients).await.unwrap();
        let interval = h.engine.start(TENANT, MonitorKind::Coefficients).await.unwrap();
        assert_eq!(interval, Duration::from_secs(5 * 60));
        assert_eq!(h.engine.registry().len(), 1);
        assert!(h.doc().await.state.auto.contains(&MonitorKind::Coefficients));

        assert!(h.engine.stop(TENANT, MonitorKind::Coefficients).await.unwrap());
        assert!(!h.engine.stop(TENANT, MonitorKind::Coefficients).await.unwrap());
        let doc = h.doc().await;
        assert!(doc.state.auto.is_empty());
        assert_eq!(doc.settings.warehouses.target, Some(vec![]));
        assert_eq!(
            h.store.activity(TENANT),
            vec!["start_coefficients", "start_coefficients", "stop_coefficients"]
        );
    }

    /// Reads pass through; every document write fails.
    struct ReadOnlyStore(Arc<MemoryStore>);

    #[async_trait]
    impl SettingsStore for ReadOnlyStore {
        async fn get_global(&self) -> Result<Option<GlobalDefaults>, StoreError> {
            self.0.get_global().await
        }

        async fn put_global(&self, defaults: &GlobalDefaults) -> Result<(), StoreError> {
            self.0.put_global(defaults).await
        }

        async fn get_tenant(&self, tenant: TenantId) -> Result<Option<TenantDoc>, StoreError> {
            self.0.get_tenant(tenant).await
        }

        async fn create_tenant_if_absent(&self, doc: TenantDoc) -> Result<TenantDoc, StoreError> {
            self.0.create_tenant_if_absent(doc).await
        }

        async fn upsert_tenant(
            &self,
            tenant: TenantId,
            _changes: &[TenantChange],
            _now: DateTime<Utc>,
        ) -> Result<TenantDoc, StoreError> {
            Err(StoreError::TenantNotFound(tenant))
        }

        async fn list_tenants(&self) -> Result<Vec<TenantDoc>, StoreError> {
            self.0.list_tenants().await
        }

        async fn log_activity(
            &self,
            tenant: TenantId,
            action: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.0.log_activity(tenant, action, at).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_leaves_no_job_when_flag_cannot_be_saved() {
        let h = harness(msk(10, 10, 0)).await;
        let client = ApiClient::new(h.upstream.clone(), h.clock.clone());
        let engine = MonitoringEngine::new(EngineParts {
            settings: Arc::new(ReadOnlyStore(h.store.clone())),
            credentials: h.store.clone(),
            api: UpstreamApi::new(Arc::new(client), h.clock.clone()),
            delivery: h.delivery.clone(),
            clock: h.clock.clone(),
        });

        let err = engine.start(TENANT, MonitorKind::Coefficients).await.unwrap_err();

        assert!(matches!(err, MonitorError::Store(StoreError::TenantNotFound(TENANT))));
        assert!(engine.registry().is_empty());
        assert_eq!(h.upstream.count(COEFFS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_replaces_live_job() {
        let h = harness(msk(10, 10, 0)).await;
        assert!(!h
            .engine
            .set_interval(TENANT, MonitorKind::Stock, 60)
            .await
            .unwrap());

        h.engine.start(TENANT, MonitorKind::Stock).await.unwrap();
        assert!(h
            .engine
            .set_interval(TENANT, MonitorKind::Stock, 30)
            .await
            .unwrap());
        assert_eq!(
            h.engine.registry().interval(TENANT, MonitorKind::Stock),
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(h.engine.registry().len(), 1);
        h.engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_jobs_from_auto_flags() {
        let h = harness(msk(10, 10, 0)).await;
        h.set(&[
            TenantChange::SetAuto {
                kind: MonitorKind::Coefficients,
                enabled: true,
            },
            TenantChange::SetAuto {
                kind: MonitorKind::Stock,
                enabled: true,
            },
        ])
        .await;

        assert_eq!(h.engine.restore_jobs().await.unwrap(), 2);
        assert!(h.engine.registry().is_running(TENANT, MonitorKind::Stock));
        assert_eq!(h.engine.shutdown(), 2);
    }

    #[tokio::test]
    async fn test_stock_tick_scheduled_sends_low_only() {
        let h = harness(msk(10, 10, 0)).await;
        let defaults = h.store.get_global().await.unwrap().unwrap();
        h.upstream.route(
            &defaults.api.urls.stock_request,
            200,
            json!({"data": {"taskId": "t1"}}),
        );
        h.upstream.route(
            &defaults.api.urls.stock_download.replace("{task_id}", "t1"),
            200,
            json!([
                {"vendorCode": "A", "warehouses": [{"warehouseName": "Всего находится на складах", "quantity": 100}]},
                {"vendorCode": "B", "warehouses": [{"warehouseName": "Всего находится на складах", "quantity": 2}]}
            ]),
        );

        let outcome = h
            .engine
            .handle_tick(TENANT, MonitorKind::Stock, TriggerKind::Scheduled)
            .await
            .unwrap();

        assert_eq!(outcome, TickOutcome::Delivered { messages: 1 });
        let texts = h.delivery.texts(TENANT);
        assert!(texts[0].contains("Article: B"));
        assert!(!texts[0].contains("Article: A"));
    }

    #[tokio::test]
    async fn test_target_cap_rejects_without_storing() {
        let h = harness(msk(10, 10, 0)).await;
        h.engine.set_targets(TENANT, &[1, 2, 3, 4, 5]).await.unwrap();

        let err = h.engine.set_targets(TENANT, &[1, 2, 3, 4, 5, 6]).await.unwrap_err();

        assert!(matches!(
            err,
            MonitorError::TooManyTargets {
                requested: 6,
                limit: MAX_TARGETS
            }
        ));
        assert_eq!(h.doc().await.settings.warehouses.target, Some(vec![1, 2, 3, 4, 5]));
    }

    #[tokio::test]
    async fn test_sales_report_is_delivered() {
        let h = harness(msk(10, 10, 0)).await;
        h.upstream.route(
            SALES,
            200,
            json!({"data": {"cards": [
                {"vendorCode": "A", "statistics": {"selectedPeriod": {
                    "begin": "2025-03-10 00:00:01", "ordersCount": 2, "ordersSumRub": 300.0}}},
                {"vendorCode": "B", "statistics": {"selectedPeriod": {
                    "begin": "2025-03-10 00:00:01", "ordersCount": 0, "ordersSumRub": 0.0}}}
            ]}}),
        );

        let outcome = h
            .engine
            .run_report(TENANT, Report::Sales(SalesPeriod::Day))
            .await
            .unwrap();

        assert_eq!(outcome, TickOutcome::Delivered { messages: 1 });
        let texts = h.delivery.texts(TENANT);
        assert_eq!(texts[0], "🔄 Collecting sales...");
        assert!(texts[1].starts_with("💰 Sales for 10.03.2025:"));
        assert!(texts[1].contains("-- 2 pcs"));
        assert!(h.store.activity(TENANT).contains(&"sales_day_requested".to_string()));
    }

    #[tokio::test]
    async fn test_promotions_report_is_delivered() {
        let h = harness(msk(10, 10, 0)).await;
        h.upstream.route(
            ADVERTS,
            200,
            json!({"adverts": [{"type": 8, "status": 9, "count": 2}], "all": 2}),
        );

        h.engine.run_report(TENANT, Report::Promotions).await.unwrap();

        let texts = h.delivery.texts(TENANT);
        assert_eq!(texts.last().unwrap(), "📣 Advertising campaigns: 2\n\nAutomatic (running): 2\n");
    }

    #[tokio::test]
    async fn test_report_failure_is_surfaced_once() {
        let h = harness(msk(10, 10, 0)).await;
        h.upstream.route(SALES, 401, json!({"error": "unauthorized"}));

        let err = h
            .engine
            .run_report(TENANT, Report::Sales(SalesPeriod::Week))
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::UpstreamUnavailable(_)));
        let texts = h.delivery.texts(TENANT);
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("HTTP 401"));
    }
}
