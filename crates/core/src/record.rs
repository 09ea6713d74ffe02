//! Upstream feed records.

use crate::WarehouseId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A feed entry that cannot be turned into a record. Skipped per record,
/// never fatal for the tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("unparseable warehouse id: {0}")]
    InvalidId(String),
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
}

/// One acceptance-coefficient entry (warehouse + date + box type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRecord {
    pub warehouse_id: WarehouseId,
    pub warehouse_name: String,
    pub box_type: String,
    /// Lower is better; negative means acceptance is unavailable/free depending on upstream semantics.
    pub coefficient: f64,
    /// Raw ISO-8601 timestamp as sent by upstream.
    pub date: String,
    pub allow_unload: bool,
}

impl WarehouseRecord {
    /// Parse one entry of the coefficients feed.
    ///
    /// Expected shape:
    /// `{"warehouseID": 507, "warehouseName": "Коледино", "boxTypeName": "Короба",
    ///   "coefficient": 1, "date": "2025-03-02T00:00:00Z", "allowUnload": true}`
    pub fn from_value(value: &Value) -> Result<Self, MalformedRecord> {
        let obj = value.as_object().ok_or(MalformedRecord::NotAnObject)?;

        let warehouse_id = match obj.get("warehouseID") {
            Some(raw) => parse_id(raw).ok_or_else(|| MalformedRecord::InvalidId(raw.to_string()))?,
            None => return Err(MalformedRecord::InvalidId("<missing>".to_string())),
        };

        let warehouse_name = obj
            .get("warehouseName")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(MalformedRecord::MissingField("warehouseName"))?
            .to_string();

        let coefficient = obj
            .get("coefficient")
            .and_then(flexible_f64)
            .ok_or(MalformedRecord::MissingField("coefficient"))?;

        let box_type = obj
            .get("boxTypeName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let date = obj
            .get("date")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let allow_unload = obj
            .get("allowUnload")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            warehouse_id,
            warehouse_name,
            box_type,
            coefficient,
            date,
            allow_unload,
        })
    }
}

/// Warehouse id as a number or a numeric string.
pub fn parse_id(value: &Value) -> Option<WarehouseId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Number, or a string with either `.` or `,` as decimal separator.
fn flexible_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn de_flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(flexible_f64))
}

/// Box tariff for a warehouse. Id-less; matched by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffRecord {
    pub warehouse_name: String,
    /// Base delivery cost for the first liter.
    #[serde(default, deserialize_with = "de_flexible_f64")]
    pub box_delivery_base: Option<f64>,
    /// Cost per additional liter.
    #[serde(default, deserialize_with = "de_flexible_f64")]
    pub box_delivery_liter: Option<f64>,
    /// Delivery and storage coefficient, percent.
    #[serde(default, deserialize_with = "de_flexible_f64")]
    pub box_delivery_and_storage_expr: Option<f64>,
}

/// Name of the per-article row that carries the total quantity.
pub const STOCK_TOTAL_ROW: &str = "Всего находится на складах";

/// One article from the stock report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    #[serde(default)]
    pub vendor_code: String,
    #[serde(default)]
    pub warehouses: Vec<StockWarehouse>,
}

impl StockItem {
    /// Quantity from the "total" row, if the report has one.
    pub fn total_quantity(&self) -> Option<i64> {
        self.warehouses
            .iter()
            .find(|w| w.warehouse_name == STOCK_TOTAL_ROW)
            .map(|w| w.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockWarehouse {
    #[serde(default)]
    pub warehouse_name: String,
    #[serde(default)]
    pub quantity: i64,
}

/// One product card from the sales funnel report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesCard {
    #[serde(default)]
    pub vendor_code: String,
    #[serde(default)]
    pub statistics: SalesStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesStatistics {
    #[serde(default)]
    pub selected_period: PeriodStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStatistics {
    /// Period start as sent by upstream (`YYYY-MM-DD HH:MM:SS` or ISO-8601).
    #[serde(default)]
    pub begin: String,
    #[serde(default)]
    pub orders_count: i64,
    #[serde(default)]
    pub orders_sum_rub: f64,
}

/// Advertising campaign counts grouped by type and status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionCount {
    #[serde(default)]
    pub adverts: Vec<AdvertGroup>,
    #[serde(default)]
    pub all: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertGroup {
    #[serde(rename = "type", default)]
    pub advert_type: i64,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_record_from_value() {
        let value = json!({
            "warehouseID": 507,
            "warehouseName": "Коледино",
            "boxTypeName": "Короба",
            "coefficient": 1,
            "date": "2025-03-02T00:00:00Z",
            "allowUnload": true
        });
        let record = WarehouseRecord::from_value(&value).unwrap();
        assert_eq!(
            record,
            WarehouseRecord {
                warehouse_id: 507,
                warehouse_name: "Коледино".to_string(),
                box_type: "Короба".to_string(),
                coefficient: 1.0,
                date: "2025-03-02T00:00:00Z".to_string(),
                allow_unload: true,
            }
        );
    }

    #[test]
    fn test_record_string_id_is_accepted() {
        let value = json!({"warehouseID": "117986", "warehouseName": "Казань", "coefficient": -1});
        let record = WarehouseRecord::from_value(&value).unwrap();
        assert_eq!(record.warehouse_id, 117986);
        assert_eq!(record.coefficient, -1.0);
        assert!(!record.allow_unload);
    }

    #[test]
    fn test_record_bad_id_is_malformed() {
        let value = json!({"warehouseID": "abc", "warehouseName": "X", "coefficient": 0});
        assert!(matches!(
            WarehouseRecord::from_value(&value),
            Err(MalformedRecord::InvalidId(_))
        ));
        let value = json!({"warehouseName": "X", "coefficient": 0});
        assert!(matches!(
            WarehouseRecord::from_value(&value),
            Err(MalformedRecord::InvalidId(_))
        ));
        assert_eq!(
            WarehouseRecord::from_value(&json!([1, 2])),
            Err(MalformedRecord::NotAnObject)
        );
    }

    #[test]
    fn test_tariff_accepts_comma_decimals() {
        let value = json!({
            "warehouseName": "Коледино",
            "boxDeliveryBase": "46,2",
            "boxDeliveryLiter": 11.5,
            "boxDeliveryAndStorageExpr": "135",
        });
        let tariff: TariffRecord = serde_json::from_value(value).unwrap();
        assert_eq!(tariff.box_delivery_base, Some(46.2));
        assert_eq!(tariff.box_delivery_liter, Some(11.5));
        assert_eq!(tariff.box_delivery_and_storage_expr, Some(135.0));
    }

    #[test]
    fn test_tariff_dash_is_none() {
        let value = json!({"warehouseName": "Тула", "boxDeliveryBase": "-"});
        let tariff: TariffRecord = serde_json::from_value(value).unwrap();
        assert_eq!(tariff.box_delivery_base, None);
        assert_eq!(tariff.box_delivery_and_storage_expr, None);
    }

    #[test]
    fn test_stock_total_quantity() {
        let item: StockItem = serde_json::from_value(json!({
            "vendorCode": "A-1",
            "warehouses": [
                {"warehouseName": "Коледино", "quantity": 4},
                {"warehouseName": STOCK_TOTAL_ROW, "quantity": 12}
            ]
        }))
        .unwrap();
        assert_eq!(item.total_quantity(), Some(12));

        let empty = StockItem {
            vendor_code: "B".into(),
            warehouses: vec![],
        };
        assert_eq!(empty.total_quantity(), None);
    }

    #[test]
    fn test_sales_card_tolerates_missing_statistics() {
        let card: SalesCard = serde_json::from_value(json!({
            "vendorCode": "A-1",
            "statistics": {"selectedPeriod": {
                "begin": "2025-03-10 00:00:01",
                "ordersCount": 3,
                "ordersSumRub": 4500.5
            }}
        }))
        .unwrap();
        assert_eq!(card.statistics.selected_period.orders_count, 3);

        let bare: SalesCard = serde_json::from_value(json!({"vendorCode": "B"})).unwrap();
        assert_eq!(bare.statistics.selected_period.orders_count, 0);
    }

    #[test]
    fn test_promotion_count_shape() {
        let count: PromotionCount = serde_json::from_value(json!({
            "adverts": [{"type": 8, "status": 9, "count": 2, "advert_list": []}],
            "all": 2
        }))
        .unwrap();
        assert_eq!(count.all, 2);
        assert_eq!(count.adverts[0].advert_type, 8);
    }
}
