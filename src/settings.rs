//! Typed access to the handful of settings the tracker reads every cycle.
//! Values live in the store as JSON so external tooling can edit them; a
//! malformed value logs a warning and falls back to the default instead of
//! stalling the loop.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use crate::store::Store;

pub const POLL_INTERVAL_KEY: &str = "poll_interval_ms";
pub const IDLE_THRESHOLD_KEY: &str = "idle_threshold_ms";
pub const TRACKING_MODE_KEY: &str = "tracking_mode";
pub const RECORD_TITLES_KEY: &str = "record_titles";
pub const BREAK_REMINDER_KEY: &str = "break_reminder_mins";
pub const MACHINE_ID_KEY: &str = "machine_id";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_millis(300_000);
const DEFAULT_MACHINE_ID: &str = "unknown";

/// Whether unknown executables are tracked by default (blacklist) or only
/// explicitly included ones are (whitelist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    #[default]
    Blacklist,
    Whitelist,
}

impl TrackingMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Blacklist => "blacklist",
            TrackingMode::Whitelist => "whitelist",
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blacklist" => Ok(TrackingMode::Blacklist),
            "whitelist" => Ok(TrackingMode::Whitelist),
            other => Err(format!("unknown tracking mode {other:?}")),
        }
    }
}

#[derive(Clone)]
pub struct TrackerSettings {
    store: Arc<dyn Store>,
}

impl TrackerSettings {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get_setting(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Setting {key} holds a malformed value {raw:?}: {e}");
                Ok(None)
            }
        }
    }

    async fn write<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        self.store.set_setting(key, &json!(value).to_string()).await
    }

    pub async fn poll_interval(&self) -> Result<Duration> {
        Ok(self
            .read::<u64>(POLL_INTERVAL_KEY)
            .await?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL))
    }

    pub async fn set_poll_interval(&self, interval: Duration) -> Result<()> {
        self.write(POLL_INTERVAL_KEY, interval.as_millis() as u64)
            .await
    }

    pub async fn idle_threshold(&self) -> Result<Duration> {
        Ok(self
            .read::<u64>(IDLE_THRESHOLD_KEY)
            .await?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_IDLE_THRESHOLD))
    }

    pub async fn set_idle_threshold(&self, threshold: Duration) -> Result<()> {
        self.write(IDLE_THRESHOLD_KEY, threshold.as_millis() as u64)
            .await
    }

    pub async fn tracking_mode(&self) -> Result<TrackingMode> {
        let Some(raw) = self.read::<String>(TRACKING_MODE_KEY).await? else {
            return Ok(TrackingMode::default());
        };
        Ok(raw.parse().unwrap_or_else(|e: String| {
            warn!("{e}, staying in blacklist mode");
            TrackingMode::default()
        }))
    }

    pub async fn set_tracking_mode(&self, mode: TrackingMode) -> Result<()> {
        self.write(TRACKING_MODE_KEY, mode.as_str()).await
    }

    pub async fn record_titles(&self) -> Result<bool> {
        Ok(self.read::<bool>(RECORD_TITLES_KEY).await?.unwrap_or(true))
    }

    pub async fn set_record_titles(&self, record: bool) -> Result<()> {
        self.write(RECORD_TITLES_KEY, record).await
    }

    /// How long uninterrupted activity may run before subscribers get a
    /// [BreakSuggested](crate::tracker::events::TrackerEvent) nudge. `None`
    /// means the reminder is off, which is the default.
    pub async fn break_reminder(&self) -> Result<Option<Duration>> {
        let minutes = self.read::<u64>(BREAK_REMINDER_KEY).await?.unwrap_or(0);
        Ok((minutes > 0).then(|| Duration::from_secs(minutes * 60)))
    }

    pub async fn set_break_reminder(&self, minutes: u64) -> Result<()> {
        self.write(BREAK_REMINDER_KEY, minutes).await
    }

    /// Stable identifier stamped on every session this machine records.
    pub async fn machine_id(&self) -> Result<String> {
        Ok(self
            .read::<String>(MACHINE_ID_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_MACHINE_ID.to_owned()))
    }
}
