//! Settings documents as stored by the settings store.
//!
//! One [`GlobalDefaults`] document holds every tunable. Each tenant owns a
//! [`TenantDoc`] whose overrides are all optional; unset fields fall back to
//! the global value when the effective configuration is built.

use crate::{MonitorKind, TenantId, WarehouseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Polling intervals in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervals {
    pub check_coefficients: u32,
    pub check_stock: u32,
}

impl Intervals {
    pub fn for_kind(&self, kind: MonitorKind) -> u32 {
        match kind {
            MonitorKind::Coefficients => self.check_coefficients,
            MonitorKind::Stock => self.check_stock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Lowest acceptable coefficient (inclusive).
    pub min_coefficient: f64,
    /// Highest acceptable coefficient (inclusive).
    pub max_coefficient: f64,
    /// Articles at or below this quantity are reported as running out.
    pub low_stock: i64,
}

/// Warehouse selection lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseSets {
    /// Allow-list; empty means every warehouse.
    #[serde(default, deserialize_with = "id_list::deserialize")]
    pub target: Vec<WarehouseId>,
    /// Deny-list; wins over `target`.
    #[serde(default, deserialize_with = "id_list::deserialize")]
    pub excluded: Vec<WarehouseId>,
    /// Silenced until the next working day.
    #[serde(
        default,
        deserialize_with = "id_list::deserialize",
        serialize_with = "id_list::serialize_as_strings"
    )]
    pub paused: Vec<WarehouseId>,
}

/// Most warehouses a tenant may track at once.
pub const MAX_TARGETS: usize = 5;

/// Local hours during which scheduled ticks may notify. `[0, 0]` is unrestricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: u32,
    pub end: u32,
}

impl WorkingHours {
    pub const UNRESTRICTED: WorkingHours = WorkingHours { start: 0, end: 0 };

    pub fn is_unrestricted(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Whether `hour` (0..24, local) falls inside the window. A window whose
    /// start is after its end wraps past midnight.
    pub fn contains(&self, hour: u32) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUrls {
    pub coefficients: String,
    /// May contain `{date_now}` (YYYY-MM-DD).
    pub tariffs: String,
    pub stock_request: String,
    /// Must contain `{task_id}`.
    pub stock_download: String,
    /// Sales funnel report, requested with a POST body.
    #[serde(default = "default_sales_url")]
    pub sales: String,
    /// Advertising campaign counts.
    #[serde(default = "default_promotion_count_url")]
    pub promotion_count: String,
}

fn default_sales_url() -> String {
    "https://seller-analytics-api.wildberries.ru/api/v2/nm-report/detail".to_string()
}

fn default_promotion_count_url() -> String {
    "https://advert-api.wildberries.ru/adv/v1/promotion/count".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    pub urls: ApiUrls,
    /// Wait between requesting the stock report and downloading it.
    pub request_delay_secs: u64,
}

/// Global defaults document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDefaults {
    pub intervals: Intervals,
    pub thresholds: Thresholds,
    #[serde(default)]
    pub warehouses: WarehouseSets,
    pub working_hours: WorkingHours,
    /// Tenant timezone as a fixed offset from UTC.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
    /// Box type the coefficients monitor keeps.
    #[serde(default = "default_box_type")]
    pub box_type: String,
    pub api: ApiSettings,
    /// Tariff display name -> coefficient-feed display name.
    #[serde(default = "default_tariff_aliases")]
    pub tariff_aliases: BTreeMap<String, String>,
}

fn default_utc_offset() -> i32 {
    180
}

fn default_box_type() -> String {
    "Короба".to_string()
}

fn default_tariff_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Тула".to_string(), "Алексин (Тула)".to_string()),
        (
            "Санкт-Петербург (Уткина Заводь)".to_string(),
            "СПБ Шушары".to_string(),
        ),
    ])
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            intervals: Intervals {
                check_coefficients: 5,
                check_stock: 120,
            },
            thresholds: Thresholds {
                min_coefficient: 0.0,
                max_coefficient: 6.0,
                low_stock: 20,
            },
            warehouses: WarehouseSets {
                target: Vec::new(),
                excluded: vec![204939, 324108, 218987],
                paused: Vec::new(),
            },
            working_hours: WorkingHours { start: 8, end: 22 },
            utc_offset_minutes: default_utc_offset(),
            box_type: default_box_type(),
            api: ApiSettings {
                urls: ApiUrls {
                    coefficients: "https://supplies-api.wildberries.ru/api/v1/acceptance/coefficients"
                        .to_string(),
                    tariffs: "https://common-api.wildberries.ru/api/v1/tariffs/box?date={date_now}"
                        .to_string(),
                    stock_request: "https://seller-analytics-api.wildberries.ru/api/v1/warehouse_remains?groupBySa=true"
                        .to_string(),
                    stock_download: "https://seller-analytics-api.wildberries.ru/api/v1/warehouse_remains/tasks/{task_id}/download"
                        .to_string(),
                    sales: default_sales_url(),
                    promotion_count: default_promotion_count_url(),
                },
                request_delay_secs: 20,
            },
            tariff_aliases: default_tariff_aliases(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_coefficients: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_stock: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_coefficient: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_coefficient: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_stock: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseOverrides {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "id_list::deserialize_opt"
    )]
    pub target: Option<Vec<WarehouseId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "id_list::deserialize_opt"
    )]
    pub excluded: Option<Vec<WarehouseId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "id_list::deserialize_opt",
        serialize_with = "id_list::serialize_opt_as_strings"
    )]
    pub paused: Option<Vec<WarehouseId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingHoursOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiUrlOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tariffs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_count: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiOverrides {
    #[serde(default)]
    pub urls: ApiUrlOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_secs: Option<u64>,
}

/// Per-tenant overrides. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantOverrides {
    #[serde(default)]
    pub intervals: IntervalOverrides,
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    #[serde(default)]
    pub warehouses: WarehouseOverrides,
    #[serde(default)]
    pub working_hours: WorkingHoursOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_type: Option<String>,
    #[serde(default)]
    pub api: ApiOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tariff_aliases: Option<BTreeMap<String, String>>,
}

/// State the engine maintains for a tenant (not user-tunable).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantState {
    /// Last time a scheduled tick delivered something.
    #[serde(default)]
    pub last_notification: Option<DateTime<Utc>>,
    /// When the current pause set was last extended.
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    /// Kinds with automatic monitoring switched on.
    #[serde(default)]
    pub auto: BTreeSet<MonitorKind>,
    /// Display name -> id for the tenant's target warehouses, refreshed every tick.
    #[serde(default)]
    pub known_warehouses: BTreeMap<String, WarehouseId>,
}

/// Settings document for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantDoc {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub settings: TenantOverrides,
    #[serde(default)]
    pub state: TenantState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantDoc {
    /// First-use document. The selection lists are copied from the defaults
    /// so they belong to the tenant from then on; every tunable stays unset
    /// and keeps following the global value.
    pub fn new(tenant_id: TenantId, defaults: &GlobalDefaults, now: DateTime<Utc>) -> Self {
        let settings = TenantOverrides {
            warehouses: WarehouseOverrides {
                target: Some(defaults.warehouses.target.clone()),
                excluded: None,
                paused: Some(defaults.warehouses.paused.clone()),
            },
            ..Default::default()
        };
        Self {
            tenant_id,
            settings,
            state: TenantState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one change in place.
    pub fn apply(&mut self, change: &TenantChange) {
        let wh = &mut self.settings.warehouses;
        match change {
            TenantChange::SetTarget(ids) => wh.target = Some(ids.clone()),
            TenantChange::SetExcluded(ids) => wh.excluded = Some(ids.clone()),
            TenantChange::ClearPaused => {
                wh.paused = Some(Vec::new());
                self.state.paused_at = None;
            }
            TenantChange::Pause { ids, at } => {
                let paused = wh.paused.get_or_insert_with(Vec::new);
                let mut added = false;
                for id in ids {
                    if !paused.contains(id) {
                        paused.push(*id);
                        added = true;
                    }
                }
                if added || self.state.paused_at.is_none() {
                    self.state.paused_at = Some(*at);
                }
            }
            TenantChange::SetLastNotification(at) => self.state.last_notification = Some(*at),
            TenantChange::SetAuto { kind, enabled } => {
                if *enabled {
                    self.state.auto.insert(*kind);
                } else {
                    self.state.auto.remove(kind);
                }
            }
            TenantChange::SetInterval { kind, minutes } => match kind {
                MonitorKind::Coefficients => {
                    self.settings.intervals.check_coefficients = Some(*minutes)
                }
                MonitorKind::Stock => self.settings.intervals.check_stock = Some(*minutes),
            },
            TenantChange::SetCoefficientRange { min, max } => {
                self.settings.thresholds.min_coefficient = Some(*min);
                self.settings.thresholds.max_coefficient = Some(*max);
            }
            TenantChange::SetLowStock(threshold) => {
                self.settings.thresholds.low_stock = Some(*threshold)
            }
            TenantChange::SetWorkingHours(hours) => {
                self.settings.working_hours = WorkingHoursOverrides {
                    start: Some(hours.start),
                    end: Some(hours.end),
                }
            }
            TenantChange::RememberWarehouses(names) => {
                for (name, id) in names {
                    self.state.known_warehouses.insert(name.clone(), *id);
                }
            }
        }
    }
}

/// Partial update of a tenant document, applied atomically by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TenantChange {
    SetTarget(Vec<WarehouseId>),
    SetExcluded(Vec<WarehouseId>),
    /// Lift every pause at once.
    ClearPaused,
    /// Add ids to the pause set; ids already paused are left alone.
    Pause {
        ids: Vec<WarehouseId>,
        at: DateTime<Utc>,
    },
    SetLastNotification(DateTime<Utc>),
    SetAuto {
        kind: MonitorKind,
        enabled: bool,
    },
    SetInterval {
        kind: MonitorKind,
        minutes: u32,
    },
    SetCoefficientRange {
        min: f64,
        max: f64,
    },
    SetLowStock(i64),
    SetWorkingHours(WorkingHours),
    RememberWarehouses(Vec<(String, WarehouseId)>),
}

/// Warehouse id lists stored either as numbers or as numeric strings.
mod id_list {
    use crate::{parse_id, WarehouseId};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    fn parse_all<E: Error>(values: Vec<Value>) -> Result<Vec<WarehouseId>, E> {
        values
            .iter()
            .map(|v| parse_id(v).ok_or_else(|| E::custom(format!("invalid warehouse id: {v}"))))
            .collect()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<WarehouseId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_all(Vec::<Value>::deserialize(deserializer)?)
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Vec<WarehouseId>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Vec<Value>>::deserialize(deserializer)? {
            Some(values) => parse_all(values).map(Some),
            None => Ok(None),
        }
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize_as_strings<S>(ids: &Vec<WarehouseId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(ids.iter().map(|id| id.to_string()))
    }

    pub fn serialize_opt_as_strings<S>(
        ids: &Option<Vec<WarehouseId>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ids {
            Some(ids) => serialize_as_strings(ids, serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_working_hours_contains() {
        let day = WorkingHours { start: 9, end: 22 };
        assert!(!day.contains(8));
        assert!(day.contains(9));
        assert!(day.contains(21));
        assert!(!day.contains(22));

        let night = WorkingHours { start: 22, end: 6 };
        assert!(night.contains(23));
        assert!(night.contains(5));
        assert!(!night.contains(12));

        assert!(WorkingHours::UNRESTRICTED.contains(3));
    }

    #[test]
    fn test_paused_serializes_as_strings_and_reads_either() {
        let sets = WarehouseSets {
            target: vec![1],
            excluded: vec![],
            paused: vec![507, 117986],
        };
        let value = serde_json::to_value(&sets).unwrap();
        assert_eq!(value["paused"], json!(["507", "117986"]));
        assert_eq!(value["target"], json!([1]));

        let parsed: WarehouseSets =
            serde_json::from_value(json!({"target": ["10", 11], "paused": ["507"]})).unwrap();
        assert_eq!(parsed.target, vec![10, 11]);
        assert_eq!(parsed.paused, vec![507]);
        assert!(parsed.excluded.is_empty());
    }

    #[test]
    fn test_invalid_id_in_list_is_rejected() {
        let parsed: Result<WarehouseSets, _> =
            serde_json::from_value(json!({"target": ["ten"]}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_tenant_overrides_skip_unset_fields() {
        let overrides = TenantOverrides {
            thresholds: ThresholdOverrides {
                max_coefficient: Some(4.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&overrides).unwrap();
        assert_eq!(value["thresholds"], json!({"max_coefficient": 4.0}));
        assert!(value["warehouses"].get("excluded").is_none());
    }

    #[test]
    fn test_new_tenant_copies_selection_only() {
        let mut defaults = GlobalDefaults::default();
        defaults.warehouses.target = vec![1, 2];
        let doc = TenantDoc::new(42, &defaults, ts(10));
        assert_eq!(doc.settings.warehouses.target, Some(vec![1, 2]));
        assert_eq!(doc.settings.warehouses.paused, Some(vec![]));
        assert_eq!(doc.settings.warehouses.excluded, None);
        assert_eq!(doc.settings.intervals, IntervalOverrides::default());
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut doc = TenantDoc::new(1, &GlobalDefaults::default(), ts(10));
        doc.apply(&TenantChange::Pause {
            ids: vec![5, 6],
            at: ts(11),
        });
        doc.apply(&TenantChange::Pause {
            ids: vec![6],
            at: ts(12),
        });
        assert_eq!(doc.settings.warehouses.paused, Some(vec![5, 6]));
        assert_eq!(doc.state.paused_at, Some(ts(11)));

        doc.apply(&TenantChange::ClearPaused);
        assert_eq!(doc.settings.warehouses.paused, Some(vec![]));
        assert_eq!(doc.state.paused_at, None);
    }

    #[test]
    fn test_auto_and_interval_changes() {
        let mut doc = TenantDoc::new(1, &GlobalDefaults::default(), ts(10));
        doc.apply(&TenantChange::SetAuto {
            kind: MonitorKind::Stock,
            enabled: true,
        });
        doc.apply(&TenantChange::SetInterval {
            kind: MonitorKind::Stock,
            minutes: 60,
        });
        assert!(doc.state.auto.contains(&MonitorKind::Stock));
        assert_eq!(doc.settings.intervals.check_stock, Some(60));

        doc.apply(&TenantChange::SetAuto {
            kind: MonitorKind::Stock,
            enabled: false,
        });
        assert!(doc.state.auto.is_empty());
    }

    #[test]
    fn test_global_defaults_roundtrip_keeps_aliases() {
        let defaults = GlobalDefaults::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let parsed: GlobalDefaults = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, defaults);
        assert_eq!(parsed.tariff_aliases.len(), 2);
    }

    #[test]
    fn test_stored_urls_without_report_endpoints_get_defaults() {
        let mut value = serde_json::to_value(GlobalDefaults::default()).unwrap();
        let urls = value["api"]["urls"].as_object_mut().unwrap();
        urls.remove("sales");
        urls.remove("promotion_count");

        let parsed: GlobalDefaults = serde_json::from_value(value).unwrap();
        assert!(parsed.api.urls.sales.ends_with("/nm-report/detail"));
        assert!(parsed.api.urls.promotion_count.ends_with("/promotion/count"));
    }
}
