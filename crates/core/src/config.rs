//! Effective configuration: one immutable snapshot per tick.

use crate::{
    ApiSettings, ApiUrls, GlobalDefaults, Intervals, MonitorKind, TenantDoc, TenantId,
    Thresholds, WarehouseId, WarehouseSets, WorkingHours,
};
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Global defaults merged with one tenant's overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub tenant_id: TenantId,
    pub intervals: Intervals,
    pub thresholds: Thresholds,
    pub warehouses: WarehouseSets,
    pub working_hours: WorkingHours,
    pub utc_offset_minutes: i32,
    pub box_type: String,
    pub api: ApiSettings,
    pub tariff_aliases: BTreeMap<String, String>,
    pub last_notification: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub known_warehouses: BTreeMap<String, WarehouseId>,
}

impl EffectiveConfig {
    /// Field-by-field merge. Scalars: tenant value if set, else global.
    /// Lists: the tenant's list replaces the global one wholesale.
    pub fn merge(global: &GlobalDefaults, tenant: &TenantDoc) -> Self {
        let o = &tenant.settings;

        let intervals = Intervals {
            check_coefficients: o
                .intervals
                .check_coefficients
                .unwrap_or(global.intervals.check_coefficients),
            check_stock: o.intervals.check_stock.unwrap_or(global.intervals.check_stock),
        };

        let thresholds = Thresholds {
            min_coefficient: o
                .thresholds
                .min_coefficient
                .unwrap_or(global.thresholds.min_coefficient),
            max_coefficient: o
                .thresholds
                .max_coefficient
                .unwrap_or(global.thresholds.max_coefficient),
            low_stock: o.thresholds.low_stock.unwrap_or(global.thresholds.low_stock),
        };

        let warehouses = WarehouseSets {
            target: o
                .warehouses
                .target
                .clone()
                .unwrap_or_else(|| global.warehouses.target.clone()),
            excluded: o
                .warehouses
                .excluded
                .clone()
                .unwrap_or_else(|| global.warehouses.excluded.clone()),
            paused: o
                .warehouses
                .paused
                .clone()
                .unwrap_or_else(|| global.warehouses.paused.clone()),
        };

        let working_hours = WorkingHours {
            start: o.working_hours.start.unwrap_or(global.working_hours.start),
            end: o.working_hours.end.unwrap_or(global.working_hours.end),
        };

        let urls = &o.api.urls;
        let api = ApiSettings {
            urls: ApiUrls {
                coefficients: urls
                    .coefficients
                    .clone()
                    .unwrap_or_else(|| global.api.urls.coefficients.clone()),
                tariffs: urls
                    .tariffs
                    .clone()
                    .unwrap_or_else(|| global.api.urls.tariffs.clone()),
                stock_request: urls
                    .stock_request
                    .clone()
                    .unwrap_or_else(|| global.api.urls.stock_request.clone()),
                stock_download: urls
                    .stock_download
                    .clone()
                    .unwrap_or_else(|| global.api.urls.stock_download.clone()),
                sales: urls
                    .sales
                    .clone()
                    .unwrap_or_else(|| global.api.urls.sales.clone()),
                promotion_count: urls
                    .promotion_count
                    .clone()
                    .unwrap_or_else(|| global.api.urls.promotion_count.clone()),
            },
            request_delay_secs: o
                .api
                .request_delay_secs
                .unwrap_or(global.api.request_delay_secs),
        };

        Self {
            tenant_id: tenant.tenant_id,
            intervals,
            thresholds,
            warehouses,
            working_hours,
            utc_offset_minutes: o.utc_offset_minutes.unwrap_or(global.utc_offset_minutes),
            box_type: o.box_type.clone().unwrap_or_else(|| global.box_type.clone()),
            api,
            tariff_aliases: o
                .tariff_aliases
                .clone()
                .unwrap_or_else(|| global.tariff_aliases.clone()),
            last_notification: tenant.state.last_notification,
            paused_at: tenant.state.paused_at,
            known_warehouses: tenant.state.known_warehouses.clone(),
        }
    }

    /// Polling period for `kind`, never shorter than one minute.
    pub fn interval(&self, kind: MonitorKind) -> Duration {
        let minutes = self.intervals.for_kind(kind).max(1);
        Duration::from_secs(u64::from(minutes) * 60)
    }

    /// Tenant timezone. Out-of-range offsets fall back to UTC.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.timezone())
    }

    /// Whether `now` falls inside the tenant's working hours.
    pub fn is_working_time(&self, now: DateTime<Utc>) -> bool {
        self.working_hours.contains(self.local(now).hour())
    }

    /// Every target warehouse is in the pause set (false when there are no targets).
    pub fn all_targets_paused(&self) -> bool {
        let w = &self.warehouses;
        !w.target.is_empty() && w.target.iter().all(|id| w.paused.contains(id))
    }
}
