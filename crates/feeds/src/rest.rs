//! Typed fetchers for the marketplace endpoints.
//!
//! Each call goes through [`ApiClient`], so every request is rate limited
//! per credential and retried on transient failures.

use crate::client::{ApiClient, HttpMethod};
use crate::error::ApiError;
use crate::retry::MAX_ATTEMPTS_LIMIT;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use slotwatch_core::{ApiSettings, Clock, PromotionCount, SalesCard, StockItem, TariffRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timezone the sales report periods are expressed in.
pub const SALES_TIMEZONE: &str = "Europe/Moscow";

const SALES_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marketplace API facade used by the monitoring pipeline.
pub struct UpstreamApi {
    client: Arc<ApiClient>,
    clock: Arc<dyn Clock>,
}

impl UpstreamApi {
    pub fn new(client: Arc<ApiClient>, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Raw acceptance-coefficient entries. Records are parsed downstream so a
    /// malformed entry only drops itself.
    pub async fn fetch_coefficients(&self, url: &str, token: &str) -> Result<Vec<Value>, ApiError> {
        let value = self.client.fetch(url, token, HttpMethod::Get, None).await?;
        match value {
            Value::Array(items) => Ok(items),
            other => Err(ApiError::ParseError(format!(
                "expected coefficient list, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Box tariffs for `date`. `url_template` may contain `{date_now}`.
    ///
    /// Response shape: `{"response": {"data": {"warehouseList": [...]}}}`.
    /// Entries that fail to parse are skipped.
    pub async fn fetch_tariffs(
        &self,
        url_template: &str,
        token: &str,
        date: NaiveDate,
    ) -> Result<Vec<TariffRecord>, ApiError> {
        let url = url_template.replace("{date_now}", &date.format("%Y-%m-%d").to_string());
        let value = self.client.fetch(&url, token, HttpMethod::Get, None).await?;
        parse_tariffs(&value)
    }

    /// Two-step stock report: request a task, wait, download it.
    ///
    /// The download uses the widest retry budget since the report may not be
    /// ready on the first try.
    pub async fn fetch_stock_report(
        &self,
        api: &ApiSettings,
        token: &str,
    ) -> Result<Vec<StockItem>, ApiError> {
        let task = self
            .client
            .fetch(&api.urls.stock_request, token, HttpMethod::Get, None)
            .await?;
        let task_id = task
            .pointer("/data/taskId")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| ApiError::ParseError("stock report response has no taskId".into()))?;
        debug!(task_id = %task_id, "Stock report requested");

        self.clock
            .sleep(Duration::from_secs(api.request_delay_secs))
            .await;

        let url = api.urls.stock_download.replace("{task_id}", &task_id);
        let policy = self
            .client
            .policy()
            .clone()
            .with_max_attempts(MAX_ATTEMPTS_LIMIT);
        let report = self
            .client
            .fetch_with_policy(&url, token, HttpMethod::Get, None, &policy)
            .await?;
        Ok(serde_json::from_value(report)?)
    }

    /// Orders per product card for `[begin, end]`, first page sorted by
    /// order count. Cards that fail to parse are skipped.
    pub async fn fetch_sales(
        &self,
        url: &str,
        token: &str,
        begin: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<SalesCard>, ApiError> {
        let body = json!({
            "brandNames": [],
            "objectIDs": [],
            "tagIDs": [],
            "nmIDs": [],
            "timezone": SALES_TIMEZONE,
            "period": {
                "begin": begin.format(SALES_DATE_FORMAT).to_string(),
                "end": end.format(SALES_DATE_FORMAT).to_string(),
            },
            "orderBy": {"field": "orders", "mode": "desc"},
            "page": 1,
        });
        let value = self
            .client
            .fetch(url, token, HttpMethod::Post, Some(body))
            .await?;

        let data = value
            .get("data")
            .ok_or_else(|| ApiError::ParseError("sales response has no data".into()))?;
        let cards = data.get("cards").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(cards
            .into_iter()
            .filter_map(|card| match serde_json::from_value::<SalesCard>(card) {
                Ok(card) => Some(card),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed sales card");
                    None
                }
            })
            .collect())
    }

    /// Campaign counts. This endpoint is slow and throttled hard, so it gets
    /// the widest retry budget.
    pub async fn fetch_promotions(&self, url: &str, token: &str) -> Result<PromotionCount, ApiError> {
        let policy = self
            .client
            .policy()
            .clone()
            .with_max_attempts(MAX_ATTEMPTS_LIMIT);
        let value = self
            .client
            .fetch_with_policy(url, token, HttpMethod::Get, None, &policy)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn parse_tariffs(value: &Value) -> Result<Vec<TariffRecord>, ApiError> {
    let list = value
        .pointer("/response/data/warehouseList")
        .or_else(|| value.pointer("/response/data"))
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::ParseError("tariff response has no warehouse list".into()))?;

    Ok(list
        .iter()
        .filter_map(|entry| match serde_json::from_value::<TariffRecord>(entry.clone()) {
            Ok(tariff) => Some(tariff),
            Err(e) => {
                debug!(error = %e, "Skipping malformed tariff entry");
                None
            }
        })
        .collect())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
