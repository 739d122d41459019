//! The tracking service: a polling loop that observes the OS probes once per
//! interval, maintains open sessions through [sessions::SessionLedger] and
//! publishes [events::TrackerEvent]s to subscribers.

mod cycle;
pub mod events;
pub mod idle;
pub mod sessions;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    grouping::GroupResolver, probes::TrackerProbes, settings::TrackerSettings, store::Store,
    utils::clock::Clock,
};

use cycle::TrackerLoop;
use events::TrackerEvent;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owns one observation loop and the resolver it feeds. All mutable tracking
/// state lives inside the loop task, so a `Tracker` can be built, started and
/// stopped without touching anything global.
pub struct Tracker {
    store: Arc<dyn Store>,
    resolver: Arc<GroupResolver>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TrackerEvent>,
    probes: Option<TrackerProbes>,
    running: Option<RunningLoop>,
}

struct RunningLoop {
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl Tracker {
    pub fn new(store: Arc<dyn Store>, probes: TrackerProbes, clock: Arc<dyn Clock>) -> Self {
        let resolver = Arc::new(GroupResolver::new(Arc::clone(&store), Arc::clone(&clock)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            resolver,
            clock,
            events,
            probes: Some(probes),
            running: None,
        }
    }

    /// Spawns the observation loop. Calling this again while the loop is
    /// running changes nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let probes = self
            .probes
            .take()
            .ok_or_else(|| anyhow!("tracker cannot be restarted after stop"))?;

        let machine_id = TrackerSettings::new(Arc::clone(&self.store))
            .machine_id()
            .await?;
        let shutdown = CancellationToken::new();
        let tracker_loop = TrackerLoop::new(
            Arc::clone(&self.store),
            probes,
            Arc::clone(&self.resolver),
            self.events.clone(),
            shutdown.clone(),
            Arc::clone(&self.clock),
            machine_id,
        );
        let task = tokio::spawn(tracker_loop.run());
        self.running = Some(RunningLoop { shutdown, task });
        info!("Tracker started");
        Ok(())
    }

    /// Stops scheduling further cycles, lets an in-flight one finish, closes
    /// every open session and waits for the loop task to exit.
    pub async fn stop(mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.shutdown.cancel();
        running.task.await.context("tracker loop panicked")??;
        Ok(())
    }

    /// Events published by the loop, starting from the moment of
    /// subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// See [GroupResolver::invalidate_rule_cache]. Call after group rules
    /// change.
    pub async fn invalidate_rule_cache(&self) {
        self.resolver.invalidate_rule_cache().await;
    }

    /// See [GroupResolver::reanalyze_groups].
    pub async fn reanalyze_groups(&self) -> Result<()> {
        self.resolver.reanalyze_groups().await
    }
}

#[cfg(test)]
mod tracker_tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use tokio::time::Instant;

    use crate::probes::{
        ActiveWindowInfo, MockActiveWindowProbe, MockProcessListProbe, RunningProcess,
    };
    use crate::store::{entities::SessionKind, memory::MemoryStore};
    use crate::utils::logging::TEST_LOGGING;

    use super::*;

    /// Wall clock pinned to a fixed date that advances with tokio's (warped)
    /// test time.
    #[derive(Clone)]
    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    impl TestClock {
        fn new() -> Self {
            Self {
                start_time: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
                reference: Instant::now(),
            }
        }
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    fn probes() -> TrackerProbes {
        let mut active = MockActiveWindowProbe::new();
        active.expect_poll().returning(|| {
            Ok(Some(ActiveWindowInfo {
                exe_name: "chrome.exe".into(),
                exe_path: None,
                window_title: "Inbox".into(),
                pid: 7001,
            }))
        });
        active.expect_idle_time().returning(|| Ok(Duration::ZERO));

        let mut processes = MockProcessListProbe::new();
        processes.expect_poll().returning(|| {
            Ok(vec![
                RunningProcess {
                    exe_name: "chrome.exe".into(),
                    pid: 7001,
                },
                RunningProcess {
                    exe_name: "code.exe".into(),
                    pid: 7002,
                },
            ])
        });

        TrackerProbes {
            active: Box::new(active),
            processes: Box::new(processes),
        }
    }

    fn tracker() -> (Arc<MemoryStore>, TestClock, Tracker) {
        *TEST_LOGGING;
        let store = Arc::new(MemoryStore::new());
        let clock = TestClock::new();
        let tracker = Tracker::new(
            store.clone() as Arc<dyn Store>,
            probes(),
            Arc::new(clock.clone()),
        );
        (store, clock, tracker)
    }

    /// Lets detached resolution tasks finish on the test runtime.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn smoke_test_tracker() -> Result<()> {
        let (store, clock, mut tracker) = tracker();
        let mut receiver = tracker.subscribe();

        tracker.start().await?;
        // Three cycles land at 0, 5 and 10 seconds.
        tokio::time::sleep(Duration::from_millis(11_000)).await;
        tracker.stop().await?;
        settle().await;

        assert_eq!(store.open_session_count()?, 0);
        let sessions = store.sessions()?;
        let start = clock.start_time;
        for session in &sessions {
            assert_eq!(session.started_at, start);
            assert_eq!(session.ended_at, Some(start + ChronoDuration::seconds(11)));
        }

        // Focused time never exceeds running time.
        let total = |kind: SessionKind| -> i64 {
            sessions
                .iter()
                .filter(|s| s.kind == kind)
                .filter_map(|s| s.duration())
                .map(|d| d.num_milliseconds())
                .sum()
        };
        assert!(total(SessionKind::Active) <= total(SessionKind::Running));

        let mut ticks = 0;
        let mut discovered = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            match event {
                TrackerEvent::Tick(tick) => {
                    assert!(!tick.is_idle);
                    ticks += 1;
                }
                TrackerEvent::AppDiscovered(app) => discovered.push(app.exe_name),
                TrackerEvent::BreakSuggested(_) => panic!("break reminders are off by default"),
            }
        }
        assert_eq!(ticks, 3);
        assert_eq!(discovered, ["chrome.exe", "code.exe"]);

        // Detached resolution matched both apps against the dictionary.
        let groups = store.groups()?;
        assert!(groups.iter().any(|g| g.name == "Google Chrome"));
        assert!(groups.iter().any(|g| g.name == "VS Code"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn interval_changes_apply_without_restart() -> Result<()> {
        let (store, _, mut tracker) = tracker();
        let settings = TrackerSettings::new(store.clone() as Arc<dyn Store>);
        let mut receiver = tracker.subscribe();

        tracker.start().await?;
        // A second start must not spawn a second loop.
        tracker.start().await?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        settings.set_poll_interval(Duration::from_millis(1000)).await?;

        // The cycle at 5 s still used the old interval; from there on the
        // loop reschedules every second: ticks at 0, 5, 6, 7 and 8 seconds.
        tokio::time::sleep(Duration::from_millis(8_400)).await;
        tracker.stop().await?;

        let mut ticks = 0;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, TrackerEvent::Tick(_)) {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 5);
        Ok(())
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() -> Result<()> {
        let (store, _, tracker) = tracker();
        tracker.stop().await?;
        assert!(store.sessions()?.is_empty());
        Ok(())
    }
}
