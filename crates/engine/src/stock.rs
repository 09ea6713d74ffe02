//! Stock report summary.

use crate::compose::{Compositor, Message};
use slotwatch_core::{StockItem, TriggerKind};
use std::fmt::Write;

/// Article and its total quantity across warehouses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLine {
    pub vendor_code: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockSummary {
    /// Every article that has a total row, in report order.
    pub all: Vec<StockLine>,
    /// Articles at or below the low-stock threshold.
    pub low: Vec<StockLine>,
}

/// Build the summary. Articles without a total row are skipped.
pub fn summarize(items: &[StockItem], low_stock: i64) -> StockSummary {
    let mut summary = StockSummary::default();
    for item in items {
        let Some(quantity) = item.total_quantity() else {
            continue;
        };
        let vendor_code = if item.vendor_code.is_empty() {
            "N/A".to_string()
        } else {
            item.vendor_code.clone()
        };
        let line = StockLine { vendor_code, quantity };
        if quantity <= low_stock {
            summary.low.push(line.clone());
        }
        summary.all.push(line);
    }
    summary
}

/// Scheduled ticks report only the low list (nothing when it is empty).
/// Manual ticks get the full list followed by the low list.
pub fn compose_stock(summary: &StockSummary, trigger: TriggerKind, compositor: &Compositor) -> Vec<Message> {
    let mut messages = Vec::new();

    if !trigger.is_scheduled() {
        if summary.all.is_empty() {
            messages.push(Message::text("📦 The stock report has no articles."));
        } else {
            messages.extend(render("📦 Stock on warehouses:\n", &summary.all, compositor));
        }
    }
    if !summary.low.is_empty() {
        messages.extend(render("⚠️ Running out of stock!\n", &summary.low, compositor));
    }
    messages
}

fn render(title: &str, lines: &[StockLine], compositor: &Compositor) -> Vec<Message> {
    let blocks: Vec<String> = lines
        .iter()
        .map(|line| {
            let mut block = String::new();
            let _ = writeln!(block, "Article: {}", line.vendor_code);
            let _ = writeln!(block, "Quantity: {}", line.quantity);
            block.push_str(&"-".repeat(30));
            block.push('\n');
            block
        })
        .collect();
    compositor
        .pack(title, &blocks)
        .into_iter()
        .map(Message::text)
        .collect()
}
