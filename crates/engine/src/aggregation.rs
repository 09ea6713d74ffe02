//! Filter & aggregation of raw coefficient records.
//!
//! Turns the raw feed into warehouse groups, each with its slots sorted by
//! date and the matching tariff attached. Per record, in order:
//!
//! 1. unparseable id: skipped
//! 2. paused: skipped entirely (contributes nothing)
//! 3. target: name remembered for the header and controls
//! 4. excluded: name remembered, record skipped (exclusion wins over target)
//! 5. not a target while targets exist: skipped
//! 6. wrong box type, unloading not allowed, or coefficient outside
//!    `[min, max]`: skipped
//! 7. date parsed when possible, otherwise shown raw
//! 8. grouped by warehouse name and sorted by date
//! 9. tariff attached by (aliased) name

use crate::tariff::{index_tariffs, TariffInfo};
use chrono::NaiveDateTime;
use serde_json::Value;
use slotwatch_core::{parse_id, EffectiveConfig, TariffRecord, WarehouseId, WarehouseRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Slot date: parsed when the upstream timestamp is valid ISO-8601.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotDate {
    Parsed(NaiveDateTime),
    Raw(String),
}

impl SlotDate {
    /// Parse an upstream timestamp, tolerating a trailing `Z` and fractional seconds.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let stripped = trimmed.strip_suffix('Z').unwrap_or(trimmed);
        NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S"))
            .map(SlotDate::Parsed)
            .unwrap_or_else(|_| SlotDate::Raw(raw.to_string()))
    }

    /// Sort key. Unparsed dates sort first.
    fn sort_key(&self) -> Option<NaiveDateTime> {
        match self {
            SlotDate::Parsed(dt) => Some(*dt),
            SlotDate::Raw(_) => None,
        }
    }
}

impl fmt::Display for SlotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotDate::Parsed(dt) => write!(f, "{}", dt.format("%d.%m.%Y")),
            SlotDate::Raw(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub date: SlotDate,
    pub coefficient: f64,
}

/// One warehouse group of the view.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseSlots {
    pub warehouse_id: WarehouseId,
    pub slots: Vec<Slot>,
    pub tariff: Option<TariffInfo>,
}

/// Warehouse name -> sorted slots, ordered by name.
pub type AggregatedView = BTreeMap<String, WarehouseSlots>;

/// Result of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub view: AggregatedView,
    /// At least one group has a slot.
    pub has_data: bool,
    pub target_names: BTreeSet<String>,
    pub excluded_names: BTreeSet<String>,
    /// Name -> id for every target seen, for mapping silence clicks back to ids.
    pub target_ids: BTreeMap<String, WarehouseId>,
}

/// Run the filter pipeline over raw feed entries.
pub fn aggregate(records: &[Value], tariffs: &[TariffRecord], config: &EffectiveConfig) -> Aggregation {
    let sets = &config.warehouses;
    let thresholds = &config.thresholds;
    let mut out = Aggregation::default();

    for raw in records {
        let Some(id) = raw.get("warehouseID").and_then(parse_id) else {
            debug!(record = %raw, "Skipping record with unparseable warehouse id");
            continue;
        };

        if sets.paused.contains(&id) {
            continue;
        }

        let record = match WarehouseRecord::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                debug!(warehouse_id = id, error = %e, "Skipping malformed record");
                continue;
            }
        };

        let is_target = sets.target.contains(&id);
        if is_target {
            out.target_names.insert(record.warehouse_name.clone());
            out.target_ids.insert(record.warehouse_name.clone(), id);
        }

        if sets.excluded.contains(&id) {
            out.excluded_names.insert(record.warehouse_name.clone());
            continue;
        }

        if !sets.target.is_empty() && !is_target {
            continue;
        }

        if record.box_type != config.box_type
            || !record.allow_unload
            || record.coefficient < thresholds.min_coefficient
            || record.coefficient > thresholds.max_coefficient
        {
            continue;
        }

        out.view
            .entry(record.warehouse_name)
            .or_insert_with(|| WarehouseSlots {
                warehouse_id: id,
                slots: Vec::new(),
                tariff: None,
            })
            .slots
            .push(Slot {
                date: SlotDate::parse(&record.date),
                coefficient: record.coefficient,
            });
    }

    let tariff_index = index_tariffs(tariffs, &config.tariff_aliases);
    for (name, group) in out.view.iter_mut() {
        // stable: unparsed dates keep their feed order
        group.slots.sort_by_key(|slot| slot.date.sort_key());
        group.tariff = tariff_index.get(name).cloned();
    }

    out.has_data = out.view.values().any(|group| !group.slots.is_empty());
    out
}
