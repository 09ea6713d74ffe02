//! Tariff classification and name aliasing.
//!
//! Tariffs carry no warehouse id, only a display name. A couple of names
//! differ between the tariff feed and the coefficients feed, so the
//! configured alias map is applied before matching.

use slotwatch_core::TariffRecord;
use std::collections::{BTreeMap, HashMap};

/// Presentational band for the delivery-and-storage percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TariffBand {
    /// 0..=130
    Ok,
    /// above 130, up to 150
    Warn,
    /// anything else
    Danger,
}

impl TariffBand {
    pub fn classify(percent: f64) -> Self {
        if (0.0..=130.0).contains(&percent) {
            TariffBand::Ok
        } else if percent > 130.0 && percent <= 150.0 {
            TariffBand::Warn
        } else {
            TariffBand::Danger
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            TariffBand::Ok => "🟢",
            TariffBand::Warn => "🟡",
            TariffBand::Danger => "🔴",
        }
    }
}

/// Tariff data attached to a warehouse group.
#[derive(Debug, Clone, PartialEq)]
pub struct TariffInfo {
    pub band: TariffBand,
    /// Delivery and storage coefficient, percent.
    pub storage_percent: f64,
    pub base_cost: Option<f64>,
    pub liter_cost: Option<f64>,
}

impl TariffInfo {
    /// `None` when the record has no percentage to classify.
    pub fn from_record(record: &TariffRecord) -> Option<Self> {
        let percent = record.box_delivery_and_storage_expr?;
        Some(Self {
            band: TariffBand::classify(percent),
            storage_percent: percent,
            base_cost: record.box_delivery_base,
            liter_cost: record.box_delivery_liter,
        })
    }
}

/// Name the coefficients feed uses for a tariff display name.
pub fn canonical_name<'a>(name: &'a str, aliases: &'a BTreeMap<String, String>) -> &'a str {
    aliases.get(name).map(String::as_str).unwrap_or(name)
}

/// Tariffs keyed by canonical warehouse name. Later duplicates win.
pub fn index_tariffs(
    tariffs: &[TariffRecord],
    aliases: &BTreeMap<String, String>,
) -> HashMap<String, TariffInfo> {
    tariffs
        .iter()
        .filter_map(|record| {
            let info = TariffInfo::from_record(record)?;
            let name = canonical_name(record.warehouse_name.trim(), aliases);
            Some((name.to_string(), info))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotwatch_core::GlobalDefaults;

    fn tariff(name: &str, percent: Option<f64>) -> TariffRecord {
        TariffRecord {
            warehouse_name: name.to_string(),
            box_delivery_base: Some(46.0),
            box_delivery_liter: Some(11.5),
            box_delivery_and_storage_expr: percent,
        }
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(TariffBand::classify(0.0), TariffBand::Ok);
        assert_eq!(TariffBand::classify(130.0), TariffBand::Ok);
        assert_eq!(TariffBand::classify(130.5), TariffBand::Warn);
        assert_eq!(TariffBand::classify(150.0), TariffBand::Warn);
        assert_eq!(TariffBand::classify(151.0), TariffBand::Danger);
        assert_eq!(TariffBand::classify(-5.0), TariffBand::Danger);
    }

    #[test]
    fn test_aliases_are_applied_before_indexing() {
        let aliases = GlobalDefaults::default().tariff_aliases;
        let index = index_tariffs(
            &[
                tariff("Тула", Some(140.0)),
                tariff("Коледино", Some(100.0)),
                tariff("Казань", None),
            ],
            &aliases,
        );

        assert_eq!(index.len(), 2);
        assert_eq!(index["Алексин (Тула)"].band, TariffBand::Warn);
        assert_eq!(index["Коледино"].band, TariffBand::Ok);
        assert!(!index.contains_key("Тула"));
    }
}
