use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::entities::{AppId, AppIdentityRecord};

/// Pushed to subscribers over a broadcast channel. Slow subscribers lag and
/// lose old events rather than slowing the tracker down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TrackerEvent {
    /// One observation cycle finished.
    Tick(TickPayload),
    /// An executable was seen for the first time ever.
    AppDiscovered(AppIdentityRecord),
    /// Uninterrupted activity passed the configured break reminder. Whatever
    /// the subscriber shows the user is its own business.
    BreakSuggested(BreakPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickPayload {
    /// The focused app, `None` when nothing tracked has focus or the user is
    /// idle.
    pub active: Option<ActiveAppInfo>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub is_idle: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAppInfo {
    pub app_id: AppId,
    pub exe_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakPayload {
    /// How long some tracked app has continuously held focus.
    pub active_for_ms: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}
