//! Pause state machine.
//!
//! A tenant silences warehouses "until tomorrow". All pauses are lifted
//! together once local time reaches the working-hours start on the day after
//! the shift the pause was applied in. The anchor is `paused_at`, or the last
//! notification for documents written before `paused_at` existed. Lifting is
//! all-or-nothing per tenant.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Timelike, Utc};
use slotwatch_core::{EffectiveConfig, TriggerKind, WarehouseId};
use std::collections::BTreeMap;

/// What the tick should do about pauses before fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    /// Nothing to change; fetch.
    Proceed,
    /// Pauses expired: clear the whole set, then fetch.
    Reset,
    /// Every target is still paused: skip the tick without any request.
    SkipAllPaused,
}

/// Moment the current pause set expires, if there is a reference time.
///
/// With a window that wraps past midnight (e.g. 22-6), the hours before the
/// window's end belong to the shift that started the previous evening.
pub fn pause_expiry(config: &EffectiveConfig) -> Option<DateTime<Utc>> {
    let reference = config.paused_at.or(config.last_notification)?;
    let tz = config.timezone();
    let local = reference.with_timezone(&tz);
    let hours = config.working_hours;
    let mut shift_day = local.date_naive();
    if hours.start > hours.end && local.hour() < hours.end {
        shift_day = shift_day.pred_opt()?;
    }
    let next_day = shift_day.checked_add_days(Days::new(1))?;
    let start = NaiveTime::from_hms_opt(config.working_hours.start.min(23), 0, 0)?;
    tz.from_local_datetime(&next_day.and_time(start))
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Whether the paused set should be cleared at `now`.
pub fn should_reset(config: &EffectiveConfig, now: DateTime<Utc>) -> bool {
    if config.warehouses.paused.is_empty() {
        return false;
    }
    pause_expiry(config).is_some_and(|expiry| now >= expiry)
}

/// Decide what to do at the start of a tick.
///
/// Expiry is evaluated for every trigger; only scheduled ticks short-circuit
/// when all targets remain paused.
pub fn evaluate(config: &EffectiveConfig, now: DateTime<Utc>, trigger: TriggerKind) -> PauseDecision {
    if should_reset(config, now) {
        PauseDecision::Reset
    } else if trigger.is_scheduled() && config.all_targets_paused() {
        PauseDecision::SkipAllPaused
    } else {
        PauseDecision::Proceed
    }
}

/// Map display names from a silence click back to warehouse ids.
/// Unknown names are dropped.
pub fn resolve_names(names: &[String], known: &BTreeMap<String, WarehouseId>) -> Vec<WarehouseId> {
    let mut ids = Vec::new();
    for id in names.iter().filter_map(|name| known.get(name.trim()).copied()) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
