//! Notification compositor.
//!
//! Packs warehouse blocks greedily into messages of at most
//! [`MESSAGE_CHAR_LIMIT`] characters. The header goes on the first message
//! only; interactive controls go on the last message of a scheduled tick.

use crate::aggregation::{Aggregation, WarehouseSlots};
use crate::tariff::TariffInfo;
use slotwatch_core::{MonitorKind, TriggerKind, WarehouseId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Internal budget per message, in characters.
pub const MESSAGE_CHAR_LIMIT: usize = 3500;

/// Part size when a message has to be re-split after a failed delivery.
pub const FALLBACK_CHAR_LIMIT: usize = 3000;

/// Transport limit for a button payload, in bytes.
pub const CALLBACK_PAYLOAD_LIMIT: usize = 64;

const SILENCE_PREFIX: &str = "silence:";
const STOP_PREFIX: &str = "stop:";
const ID_SEPARATOR: char = ',';

/// Inline button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub label: String,
    pub payload: String,
}

/// One outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub controls: Vec<Control>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            controls: Vec::new(),
        }
    }
}

/// Decoded button payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Silence these warehouse ids until tomorrow.
    Silence(Vec<WarehouseId>),
    /// Stop automatic monitoring of a kind.
    Stop(MonitorKind),
}

impl Callback {
    pub fn encode(&self) -> String {
        match self {
            Callback::Silence(ids) => {
                let mut payload = String::from(SILENCE_PREFIX);
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        payload.push(ID_SEPARATOR);
                    }
                    let _ = write!(payload, "{id}");
                }
                payload
            }
            Callback::Stop(kind) => format!("{STOP_PREFIX}{kind}"),
        }
    }

    pub fn decode(data: &str) -> Option<Self> {
        if let Some(rest) = data.strip_prefix(SILENCE_PREFIX) {
            let ids: Vec<WarehouseId> = rest
                .split(ID_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().ok())
                .collect::<Option<_>>()?;
            return (!ids.is_empty()).then_some(Callback::Silence(ids));
        }
        data.strip_prefix(STOP_PREFIX)
            .and_then(MonitorKind::parse)
            .map(Callback::Stop)
    }
}

/// Size limits used while composing.
#[derive(Debug, Clone)]
pub struct Compositor {
    pub max_chars: usize,
    pub payload_limit: usize,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            max_chars: MESSAGE_CHAR_LIMIT,
            payload_limit: CALLBACK_PAYLOAD_LIMIT,
        }
    }
}

impl Compositor {
    /// Render the coefficients view.
    ///
    /// Callers only invoke this for scheduled ticks when there is data; a
    /// manual tick without data still gets one "nothing found" message.
    pub fn compose(&self, aggregation: &Aggregation, trigger: TriggerKind) -> Vec<Message> {
        let header = render_header(&aggregation.target_names, &aggregation.excluded_names);

        let mut blocks: Vec<String> = aggregation
            .view
            .iter()
            .filter(|(_, group)| !group.slots.is_empty())
            .map(|(name, group)| render_block(name, group))
            .collect();
        if blocks.is_empty() {
            blocks.push("No acceptance slots match your settings right now.\n".to_string());
        }

        let mut messages: Vec<Message> = self
            .pack(&header, &blocks)
            .into_iter()
            .map(Message::text)
            .collect();

        if trigger.is_scheduled() && !aggregation.target_names.is_empty() {
            let controls = self.controls(&aggregation.target_ids);
            if let Some(last) = messages.last_mut() {
                last.controls = controls;
            }
        }
        messages
    }

    /// Silence buttons carry warehouse ids. Ids are packed into as few
    /// payloads as fit the transport limit, one button per payload.
    fn controls(&self, target_ids: &BTreeMap<String, WarehouseId>) -> Vec<Control> {
        let mut names_by_id: BTreeMap<WarehouseId, Vec<&str>> = BTreeMap::new();
        for (name, id) in target_ids {
            names_by_id.entry(*id).or_default().push(name);
        }

        let mut chunks: Vec<Vec<WarehouseId>> = Vec::new();
        for id in names_by_id.keys().copied() {
            if let Some(chunk) = chunks.last_mut() {
                chunk.push(id);
                if Callback::Silence(chunk.clone()).encode().len() <= self.payload_limit {
                    continue;
                }
                chunk.pop();
            }
            if Callback::Silence(vec![id]).encode().len() <= self.payload_limit {
                chunks.push(vec![id]);
            }
        }

        let mut controls = Vec::with_capacity(chunks.len() + 1);
        let single = chunks.len() == 1;
        for chunk in chunks {
            let label = if single {
                "🔕 Silence until tomorrow".to_string()
            } else {
                let names: Vec<&str> = chunk
                    .iter()
                    .filter_map(|id| names_by_id.get(id))
                    .flatten()
                    .copied()
                    .collect();
                format!("🔕 Silence: {}", names.join(", "))
            };
            controls.push(Control {
                label,
                payload: Callback::Silence(chunk).encode(),
            });
        }
        controls.push(Control {
            label: "⛔ Stop tracking".to_string(),
            payload: Callback::Stop(MonitorKind::Coefficients).encode(),
        });
        controls
    }

    /// Greedy packing. A block that alone exceeds the budget is split by
    /// lines. The header always shares its message with the first block.
    pub fn pack(&self, header: &str, blocks: &[String]) -> Vec<String> {
        let mut messages = Vec::new();
        let mut current = header.to_string();
        let mut header_only = !header.is_empty();

        for block in blocks {
            let block_len = block.chars().count();
            let current_len = current.chars().count();

            if current_len + block_len <= self.max_chars {
                current.push_str(block);
                header_only = false;
                continue;
            }
            if header_only {
                current.push_str(block);
                let mut parts = split_text(&current, self.max_chars);
                current = parts.pop().unwrap_or_default();
                messages.extend(parts);
                header_only = false;
                continue;
            }
            if !current.is_empty() {
                messages.push(std::mem::take(&mut current));
            }
            if block_len <= self.max_chars {
                current.push_str(block);
            } else {
                let mut parts = split_text(block, self.max_chars);
                current = parts.pop().unwrap_or_default();
                messages.extend(parts);
            }
        }
        if !current.is_empty() {
            messages.push(current);
        }
        messages
    }
}

fn render_header(targets: &BTreeSet<String>, excluded: &BTreeSet<String>) -> String {
    let mut header = String::from("📊 Acceptance coefficients\n");
    if !targets.is_empty() {
        let _ = writeln!(header, "🎯 Tracking: {}", join(targets));
    }
    if !excluded.is_empty() {
        let _ = writeln!(header, "🚫 Excluded: {}", join(excluded));
    }
    header.push('\n');
    header
}

fn render_block(name: &str, group: &WarehouseSlots) -> String {
    let mut block = format!("🏭 {name}\n");
    if let Some(tariff) = &group.tariff {
        block.push_str(&render_tariff(tariff));
    }
    for slot in &group.slots {
        let _ = writeln!(block, "  {}: ×{}", slot.date, format_number(slot.coefficient));
    }
    block.push('\n');
    block
}

fn render_tariff(tariff: &TariffInfo) -> String {
    let mut line = format!(
        "{} Storage and delivery: {}%",
        tariff.band.emoji(),
        format_number(tariff.storage_percent)
    );
    if let Some(base) = tariff.base_cost {
        let _ = write!(line, ", base {} ₽", format_number(base));
    }
    if let Some(liter) = tariff.liter_cost {
        let _ = write!(line, ", +{} ₽/l", format_number(liter));
    }
    line.push('\n');
    line
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// `1` rather than `1.0`; otherwise up to two decimals.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{value:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Split text into parts of at most `limit` characters, on line boundaries
/// where possible. Lines longer than `limit` are cut.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(limit) {
            let piece: String = chunk.iter().collect();
            if chunk.len() == limit {
                parts.push(piece);
            } else {
                current_len = chunk.len();
                current = piece;
            }
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Fallback split used when a message could not be delivered whole.
pub fn split_for_retry(text: &str) -> Vec<String> {
    split_text(text, FALLBACK_CHAR_LIMIT)
}
