//! On-demand reports: sales for a day or week, advertising campaign counts.

use crate::compose::{format_number, Compositor, Message};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use slotwatch_core::{PromotionCount, SalesCard};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesPeriod {
    Day,
    /// Today and the six days before it.
    Week,
}

impl SalesPeriod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "day" | "today" => Some(SalesPeriod::Day),
            "week" => Some(SalesPeriod::Week),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SalesPeriod::Day => "day",
            SalesPeriod::Week => "week",
        }
    }

    /// Local report window ending today at 23:59:59.
    pub fn range(&self, today: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let first_day = match self {
            SalesPeriod::Day => today,
            SalesPeriod::Week => today.checked_sub_days(Days::new(6)).unwrap_or(today),
        };
        let begin = first_day.and_time(NaiveTime::from_hms_opt(0, 0, 1).unwrap_or(NaiveTime::MIN));
        let end = today.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN));
        (begin, end)
    }
}

/// Cards with at least one order, grouped by the period start date, then a
/// total. Dates keep the order in which upstream returned them.
pub fn compose_sales(
    cards: &[SalesCard],
    period: SalesPeriod,
    today: NaiveDate,
    compositor: &Compositor,
) -> Vec<Message> {
    let (begin, end) = period.range(today);
    let header = match period {
        SalesPeriod::Day => format!("💰 Sales for {}:\n", begin.format("%d.%m.%Y")),
        SalesPeriod::Week => format!(
            "💰 Sales for {} - {}:\n",
            begin.format("%d.%m.%Y"),
            end.format("%d.%m.%Y")
        ),
    };

    let mut by_day: Vec<(String, Vec<&SalesCard>)> = Vec::new();
    let mut total_orders = 0;
    let mut total_sum = 0.0;
    for card in cards {
        let stats = &card.statistics.selected_period;
        if stats.orders_count <= 0 {
            continue;
        }
        total_orders += stats.orders_count;
        total_sum += stats.orders_sum_rub;

        let day = display_date(&stats.begin);
        match by_day.iter_mut().find(|(d, _)| *d == day) {
            Some((_, group)) => group.push(card),
            None => by_day.push((day, vec![card])),
        }
    }

    let mut blocks: Vec<String> = Vec::new();
    let multi_day = by_day.len() > 1;
    for (day, group) in &by_day {
        let mut block = String::new();
        if multi_day && !day.is_empty() {
            let _ = writeln!(block, "📅 {day}");
        }
        for card in group {
            let vendor_code = if card.vendor_code.is_empty() { "N/A" } else { card.vendor_code.as_str() };
            let _ = writeln!(block, "- Article: {vendor_code}");
            let _ = writeln!(block, "- Ordered: {}", card.statistics.selected_period.orders_count);
            block.push_str(&"-".repeat(27));
            block.push('\n');
        }
        blocks.push(block);
    }
    if blocks.is_empty() {
        blocks.push("No orders in this period.\n".to_string());
    }
    blocks.push(format!(
        "\nTotal:\n-- {total_orders} pcs\n-- {} ₽\n",
        format_number(total_sum)
    ));

    compositor
        .pack(&header, &blocks)
        .into_iter()
        .map(Message::text)
        .collect()
}

/// `dd.mm.yyyy` from an upstream timestamp, or the raw text when it does not parse.
fn display_date(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('Z');
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn advert_type_name(code: i64) -> String {
    match code {
        4 => "Catalog".to_string(),
        5 => "Product card".to_string(),
        6 => "Search".to_string(),
        7 => "Recommendations".to_string(),
        8 => "Automatic".to_string(),
        9 => "Auction".to_string(),
        other => format!("Type {other}"),
    }
}

fn advert_status_name(code: i64) -> String {
    match code {
        -1 => "being deleted".to_string(),
        4 => "ready to launch".to_string(),
        7 => "finished".to_string(),
        8 => "declined".to_string(),
        9 => "running".to_string(),
        11 => "paused".to_string(),
        other => format!("status {other}"),
    }
}

pub fn compose_promotions(count: &PromotionCount, compositor: &Compositor) -> Vec<Message> {
    if count.adverts.is_empty() {
        return vec![Message::text("📣 You have no advertising campaigns.")];
    }
    let header = format!("📣 Advertising campaigns: {}\n\n", count.all);
    let blocks: Vec<String> = count
        .adverts
        .iter()
        .map(|group| {
            format!(
                "{} ({}): {}\n",
                advert_type_name(group.advert_type),
                advert_status_name(group.status),
                group.count
            )
        })
        .collect();
    compositor
        .pack(&header, &blocks)
        .into_iter()
        .map(Message::text)
        .collect()
}
