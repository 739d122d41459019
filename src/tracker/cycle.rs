use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    grouping::GroupResolver,
    probes::{ActiveWindowProbe, ProcessListProbe, TrackerProbes},
    settings::{TrackerSettings, TrackingMode, DEFAULT_POLL_INTERVAL},
    store::{entities::AppId, Store},
    utils::clock::Clock,
};

use super::{
    events::{ActiveAppInfo, BreakPayload, TickPayload, TrackerEvent},
    idle::IdleEvaluator,
    sessions::SessionLedger,
};

/// The observation loop. Each cycle polls the probes once, feeds the ledger,
/// and publishes one tick event. A failed cycle is logged and skipped; the
/// loop itself only stops on cancellation.
pub(crate) struct TrackerLoop {
    store: Arc<dyn Store>,
    settings: TrackerSettings,
    active_probe: Box<dyn ActiveWindowProbe>,
    process_probe: Box<dyn ProcessListProbe>,
    resolver: Arc<GroupResolver>,
    ledger: SessionLedger,
    events: broadcast::Sender<TrackerEvent>,
    shutdown: CancellationToken,
    clock: Arc<dyn Clock>,
    prev_running: HashSet<AppId>,
    continuous_active: Duration,
    last_break_at: Option<DateTime<Utc>>,
}

impl TrackerLoop {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        probes: TrackerProbes,
        resolver: Arc<GroupResolver>,
        events: broadcast::Sender<TrackerEvent>,
        shutdown: CancellationToken,
        clock: Arc<dyn Clock>,
        machine_id: String,
    ) -> Self {
        let settings = TrackerSettings::new(Arc::clone(&store));
        let ledger = SessionLedger::new(Arc::clone(&store), machine_id);
        Self {
            store,
            settings,
            active_probe: probes.active,
            process_probe: probes.processes,
            resolver,
            ledger,
            events,
            shutdown,
            clock,
            prev_running: HashSet::new(),
            continuous_active: Duration::zero(),
            last_break_at: None,
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        info!("Tracker loop started");
        loop {
            let cycle_start = self.clock.instant();
            let interval = match self.settings.poll_interval().await {
                Ok(interval) => interval,
                Err(e) => {
                    error!("Could not read the poll interval {e:?}");
                    DEFAULT_POLL_INTERVAL
                }
            };

            if let Err(e) = self.run_cycle(interval).await {
                error!("Observation cycle failed {e:?}");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return self.finish(interval).await;
                }
                _ = self.clock.sleep_until(cycle_start + interval) => ()
            }
        }
    }

    async fn finish(mut self, interval: StdDuration) -> Result<()> {
        let interval = Duration::from_std(interval)
            .unwrap_or_else(|_| Duration::milliseconds(DEFAULT_POLL_INTERVAL.as_millis() as i64));
        self.ledger.close_all(self.clock.time(), interval).await?;
        info!("Tracker loop stopped, all sessions closed");
        Ok(())
    }

    async fn run_cycle(&mut self, poll_interval: StdDuration) -> Result<()> {
        let interval = Duration::from_std(poll_interval).context("poll interval out of range")?;
        let now = self.clock.time();

        let idle_threshold = self.settings.idle_threshold().await?;
        let mode = self.settings.tracking_mode().await?;
        let record_titles = self.settings.record_titles().await?;

        let idle_time = match self.active_probe.idle_time() {
            Ok(idle_time) => idle_time,
            Err(e) => {
                warn!("Idle probe failed {e:?}");
                StdDuration::ZERO
            }
        };
        let is_idle = IdleEvaluator::new(idle_threshold).is_idle(idle_time);

        let (active, processes) = tokio::join!(self.active_probe.poll(), self.process_probe.poll());
        let active = active.unwrap_or_else(|e| {
            warn!("Active window probe failed {e:?}");
            None
        });
        let processes = processes.unwrap_or_else(|e| {
            warn!("Process probe failed {e:?}");
            Vec::new()
        });

        let mut current_running: HashSet<AppId> = HashSet::new();
        for process in &processes {
            match self.store.find_app_by_exe(&process.exe_name).await? {
                Some(app) => {
                    if app.is_tracked && current_running.insert(app.id) {
                        self.ledger.tick_running(app.id, now, interval).await?;
                    }
                }
                // Only the blacklist mode discovers apps from the process
                // scan; a whitelist leaves unknown executables alone.
                None if mode == TrackingMode::Blacklist => {
                    let app_id = self.discover_app(&process.exe_name, None, now).await?;
                    current_running.insert(app_id);
                    self.ledger.tick_running(app_id, now, interval).await?;
                }
                None => (),
            }
        }

        // Processes gone since the previous cycle close immediately instead
        // of waiting out a whole gap window.
        let vanished: Vec<AppId> = self
            .prev_running
            .difference(&current_running)
            .copied()
            .collect();
        for app_id in vanished {
            self.ledger.end_running(app_id, now).await?;
        }
        self.prev_running = current_running;

        let mut active_info: Option<ActiveAppInfo> = None;
        if let Some(window) = active {
            let app = match self.store.find_app_by_exe(&window.exe_name).await? {
                Some(app) => Some(app),
                // Focus discovers apps in either tracking mode.
                None => {
                    let app_id = self
                        .discover_app(&window.exe_name, window.exe_path.as_deref(), now)
                        .await?;
                    self.store.get_app(app_id).await?
                }
            };

            if let Some(app) = app {
                if app.is_tracked && !is_idle {
                    let title = record_titles.then_some(window.window_title.as_str());
                    self.ledger.tick_active(app.id, title, now, interval).await?;

                    // Some focused surfaces never show up in the process scan.
                    // Keep a running session open for them anyway so focused
                    // time stays within running time.
                    if !self.prev_running.contains(&app.id) {
                        self.ledger.tick_running(app.id, now, interval).await?;
                        self.prev_running.insert(app.id);
                    }

                    if let (Some(path), None) = (window.exe_path.as_deref(), app.exe_path.as_deref())
                    {
                        self.store.set_app_path(app.id, path).await?;
                        // The path may unlock a catalog match.
                        if app.group_id.is_none() {
                            self.spawn_resolution(
                                app.id,
                                app.exe_name.clone(),
                                Some(path.to_owned()),
                            );
                        }
                    }

                    active_info = Some(ActiveAppInfo {
                        app_id: app.id,
                        exe_name: app.exe_name.clone(),
                        display_name: app.display_name.clone(),
                    });
                }
            }
        }

        self.remind_breaks(active_info.is_some(), is_idle, now, interval)
            .await?;

        let _ = self.events.send(TrackerEvent::Tick(TickPayload {
            active: active_info,
            timestamp: now,
            is_idle,
        }));
        Ok(())
    }

    /// Counts uninterrupted focus time and nudges subscribers once it passes
    /// the configured threshold. Going idle or losing focus resets the count;
    /// after a nudge the next one waits out a full threshold again.
    async fn remind_breaks(
        &mut self,
        has_active: bool,
        is_idle: bool,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> Result<()> {
        let threshold = self
            .settings
            .break_reminder()
            .await?
            .and_then(|t| Duration::from_std(t).ok());
        let Some(threshold) = threshold else {
            self.continuous_active = Duration::zero();
            return Ok(());
        };
        if !has_active || is_idle {
            self.continuous_active = Duration::zero();
            return Ok(());
        }

        self.continuous_active = self.continuous_active + interval;
        let cooled_down = self.last_break_at.map_or(true, |at| now - at > threshold);
        if self.continuous_active >= threshold && cooled_down {
            self.last_break_at = Some(now);
            info!(
                "Suggesting a break after {} minutes of activity",
                self.continuous_active.num_minutes()
            );
            let _ = self.events.send(TrackerEvent::BreakSuggested(BreakPayload {
                active_for_ms: self.continuous_active.num_milliseconds().max(0) as u64,
                timestamp: now,
            }));
        }
        Ok(())
    }

    /// First sighting of an executable: record its identity, announce it and
    /// kick off group resolution in the background.
    async fn discover_app(
        &self,
        exe_name: &str,
        exe_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AppId> {
        let display_name = display_name_from_exe(exe_name);
        let app_id = self
            .store
            .upsert_app(exe_name, exe_path, &display_name, now)
            .await?;
        info!("Discovered application {exe_name:?} as {display_name:?}");

        self.spawn_resolution(app_id, exe_name.to_owned(), exe_path.map(str::to_owned));

        if let Some(record) = self.store.get_app(app_id).await? {
            let _ = self.events.send(TrackerEvent::AppDiscovered(record));
        }
        Ok(app_id)
    }

    /// Resolution runs detached from the cycle; a failure is logged and only
    /// costs this one app its group.
    fn spawn_resolution(&self, app_id: AppId, exe_name: String, exe_path: Option<String>) {
        let resolver = Arc::clone(&self.resolver);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match resolver.resolve(&exe_name, exe_path.as_deref()).await {
                Ok(Some(group_id)) => {
                    if let Err(e) = store.set_app_group(app_id, Some(group_id)).await {
                        warn!("Could not store group {group_id} for {exe_name:?} {e:?}");
                    }
                }
                Ok(None) => (),
                Err(e) => warn!("Group resolution failed for {exe_name:?} {e:?}"),
            }
        });
    }
}

/// `"epic_games_launcher.exe"` becomes `"Epic Games Launcher"`.
fn display_name_from_exe(exe_name: &str) -> String {
    let stem = exe_name.strip_suffix(".exe").unwrap_or(exe_name);
    let spaced = stem.replace(['-', '_'], " ");
    let mut result = String::with_capacity(spaced.len());
    let mut word_start = true;
    for c in spaced.chars() {
        if c.is_alphanumeric() {
            if word_start {
                result.extend(c.to_uppercase());
            } else {
                result.push(c);
            }
            word_start = false;
        } else {
            result.push(c);
            word_start = true;
        }
    }
    result
}
