use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::store::{
    entities::{AppId, SessionId, SessionKind},
    Store,
};

/// Silence longer than two and a half poll intervals closes a session and
/// starts a fresh one instead of extending across the gap.
fn gap_threshold(interval: Duration) -> Duration {
    interval * 5 / 2
}

/// In-memory handle for one still-open session row.
#[derive(Debug, Clone)]
struct OpenSession {
    session_id: SessionId,
    started_at: DateTime<Utc>,
    last_tick: DateTime<Utc>,
    window_title: Option<String>,
}

/// Owns the open-session handle tables and turns per-tick observations into
/// open, extend and close writes against the store. At most one handle exists
/// per (app, kind); the Active table additionally never holds more than one
/// entry across all apps.
pub struct SessionLedger {
    store: Arc<dyn Store>,
    machine_id: String,
    active: HashMap<AppId, OpenSession>,
    running: HashMap<AppId, OpenSession>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn Store>, machine_id: String) -> Self {
        Self {
            store,
            machine_id,
            active: HashMap::new(),
            running: HashMap::new(),
        }
    }

    fn table(&self, kind: SessionKind) -> &HashMap<AppId, OpenSession> {
        match kind {
            SessionKind::Active => &self.active,
            SessionKind::Running => &self.running,
        }
    }

    fn table_mut(&mut self, kind: SessionKind) -> &mut HashMap<AppId, OpenSession> {
        match kind {
            SessionKind::Active => &mut self.active,
            SessionKind::Running => &mut self.running,
        }
    }

    async fn open(
        &self,
        app_id: AppId,
        kind: SessionKind,
        now: DateTime<Utc>,
        window_title: Option<&str>,
    ) -> Result<OpenSession> {
        let session_id = self
            .store
            .insert_session(app_id, kind, now, window_title, &self.machine_id)
            .await?;
        debug!("Opened {kind} session {session_id} for app {app_id}");
        Ok(OpenSession {
            session_id,
            started_at: now,
            last_tick: now,
            window_title: window_title.map(str::to_owned),
        })
    }

    /// One observation of `app_id`. Opens a session when none is open,
    /// reopens across a gap, and otherwise only bumps the in-memory tick so
    /// a continuously observed app costs no store writes.
    async fn observe(
        &mut self,
        kind: SessionKind,
        app_id: AppId,
        window_title: Option<&str>,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()> {
        let existing = self.table(kind).get(&app_id).cloned();
        match existing {
            None => {
                let handle = self.open(app_id, kind, now, window_title).await?;
                self.table_mut(kind).insert(app_id, handle);
            }
            Some(session) if now - session.last_tick > gap_threshold(interval) => {
                debug!(
                    "Gap on {kind} session for app {app_id}, started {} last seen {}",
                    session.started_at, session.last_tick
                );
                self.store
                    .close_session(session.session_id, session.last_tick + interval)
                    .await?;
                let handle = self.open(app_id, kind, now, window_title).await?;
                self.table_mut(kind).insert(app_id, handle);
            }
            Some(_) => {
                if let Some(session) = self.table_mut(kind).get_mut(&app_id) {
                    session.last_tick = now;
                    session.window_title = window_title.map(str::to_owned);
                }
            }
        }
        Ok(())
    }

    /// Observation of the focused app. Only one app may hold an open Active
    /// session; any other holder is closed first, at its last observation
    /// plus one interval rather than at `now`.
    pub async fn tick_active(
        &mut self,
        app_id: AppId,
        window_title: Option<&str>,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()> {
        let superseded: Vec<(AppId, SessionId, DateTime<Utc>)> = self
            .active
            .iter()
            .filter(|(id, _)| **id != app_id)
            .map(|(id, session)| (*id, session.session_id, session.last_tick))
            .collect();
        for (other, session_id, last_tick) in superseded {
            self.store
                .close_session(session_id, last_tick + interval)
                .await?;
            self.active.remove(&other);
        }

        self.observe(SessionKind::Active, app_id, window_title, now, interval)
            .await
    }

    /// Observation of a process present in the running set.
    pub async fn tick_running(
        &mut self,
        app_id: AppId,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()> {
        self.observe(SessionKind::Running, app_id, None, now, interval)
            .await
    }

    /// Immediate close for a process that disappeared from the running set,
    /// rather than waiting out a whole gap window.
    pub async fn end_running(&mut self, app_id: AppId, now: DateTime<Utc>) -> Result<()> {
        if let Some(session_id) = self.running.get(&app_id).map(|s| s.session_id) {
            self.store.close_session(session_id, now).await?;
            self.running.remove(&app_id);
        }
        Ok(())
    }

    /// Closes every open session, each at `min(now, last_tick + interval)`,
    /// then sweeps the store for stray open rows. Afterwards the store holds
    /// no open session at all.
    pub async fn close_all(&mut self, now: DateTime<Utc>, interval: Duration) -> Result<()> {
        let ends: Vec<(SessionId, DateTime<Utc>)> = self
            .active
            .values()
            .chain(self.running.values())
            .map(|session| (session.session_id, (session.last_tick + interval).min(now)))
            .collect();
        if !ends.is_empty() {
            self.store.close_sessions(&ends).await?;
        }
        self.active.clear();
        self.running.clear();

        self.store.close_all_open(now).await?;
        Ok(())
    }
}
