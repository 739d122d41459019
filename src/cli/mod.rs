//! Terminal entry points. `serve` runs the tracker in the foreground against
//! an in-memory store until interrupted, `resolve` dry-runs the grouping
//! cascade for one executable name.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing::level_filters::LevelFilter;

use crate::{
    grouping::GroupResolver,
    probes::{process_list::SysinfoProcessProbe, DisabledActiveWindowProbe, TrackerProbes},
    settings::{TrackerSettings, TrackingMode},
    store::{
        entities::{AppId, SessionKind},
        memory::MemoryStore,
        Store,
    },
    tracker::{events::TrackerEvent, Tracker},
    utils::{
        clock::DefaultClock,
        dir::create_application_default_path,
        logging::{enable_logging, TRACKER_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Appdwell", version, long_about = None)]
#[command(about = "Records how long applications run and hold focus", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Blacklist,
    Whitelist,
}

impl From<ModeArg> for TrackingMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Blacklist => TrackingMode::Blacklist,
            ModeArg::Whitelist => TrackingMode::Whitelist,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run the tracker in the current console until Ctrl-C, then print a usage summary"
    )]
    Serve {
        #[arg(long, help = "Milliseconds between observation cycles")]
        interval: Option<u64>,
        #[arg(long, help = "Milliseconds of inactivity before the user counts as idle")]
        idle_threshold: Option<u64>,
        #[arg(
            long,
            help = "Track every executable (blacklist) or only known ones (whitelist)"
        )]
        mode: Option<ModeArg>,
        #[arg(long, help = "Leave window titles out of recorded sessions")]
        no_titles: bool,
        #[arg(long, help = "Minutes of continuous activity before a break is suggested")]
        break_after: Option<u64>,
    },
    #[command(about = "Show which group an executable name would resolve to")]
    Resolve {
        exe: String,
        #[arg(
            long,
            help = "Full path of the executable, used for library folder matching"
        )]
        path: Option<String>,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let log_dir = create_application_default_path()?.join("logs");
    enable_logging(TRACKER_PREFIX, &log_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Serve {
            interval,
            idle_threshold,
            mode,
            no_titles,
            break_after,
        } => serve(interval, idle_threshold, mode, no_titles, break_after).await,
        Commands::Resolve { exe, path } => resolve(&exe, path.as_deref()).await,
    }
}

async fn serve(
    interval: Option<u64>,
    idle_threshold: Option<u64>,
    mode: Option<ModeArg>,
    no_titles: bool,
    break_after: Option<u64>,
) -> Result<()> {
    let store = Arc::new(MemoryStore::new());

    let settings = TrackerSettings::new(store.clone() as Arc<dyn Store>);
    if let Some(ms) = interval {
        settings.set_poll_interval(Duration::from_millis(ms)).await?;
    }
    if let Some(ms) = idle_threshold {
        settings
            .set_idle_threshold(Duration::from_millis(ms))
            .await?;
    }
    if let Some(mode) = mode {
        settings.set_tracking_mode(mode.into()).await?;
    }
    if no_titles {
        settings.set_record_titles(false).await?;
    }
    if let Some(minutes) = break_after {
        settings.set_break_reminder(minutes).await?;
    }

    let probes = TrackerProbes {
        active: Box::new(DisabledActiveWindowProbe),
        processes: Box::new(SysinfoProcessProbe::new()),
    };
    let mut tracker = Tracker::new(
        store.clone() as Arc<dyn Store>,
        probes,
        Arc::new(DefaultClock),
    );

    let events = tracker.subscribe();
    let printer = tokio::spawn(print_events(events));

    tracker.start().await?;
    println!("Tracking... press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracker.stop().await?;
    printer.await?;

    print_summary(&store)
}

/// Relays discoveries and break nudges to the console. Exits once the tracker
/// drops its side of the channel.
async fn print_events(mut events: broadcast::Receiver<TrackerEvent>) {
    loop {
        match events.recv().await {
            Ok(TrackerEvent::AppDiscovered(app)) => {
                println!("discovered {} ({})", app.display_name, app.exe_name);
            }
            Ok(TrackerEvent::BreakSuggested(payload)) => {
                println!(
                    "active for {} minutes straight, consider a break",
                    payload.active_for_ms / 60_000
                );
            }
            Ok(TrackerEvent::Tick(_)) => (),
            Err(broadcast::error::RecvError::Lagged(_)) => (),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn print_summary(store: &MemoryStore) -> Result<()> {
    let apps = store.apps()?;
    let sessions = store.sessions()?;

    let mut totals: HashMap<AppId, (ChronoDuration, ChronoDuration)> = HashMap::new();
    for session in &sessions {
        let Some(duration) = session.duration() else {
            continue;
        };
        let entry = totals
            .entry(session.app_id)
            .or_insert((ChronoDuration::zero(), ChronoDuration::zero()));
        match session.kind {
            SessionKind::Active => entry.0 = entry.0 + duration,
            SessionKind::Running => entry.1 = entry.1 + duration,
        }
    }

    let mut rows: Vec<_> = apps
        .iter()
        .filter_map(|app| totals.get(&app.id).map(|t| (app, t)))
        .collect();
    rows.sort_by_key(|(_, (_, running))| std::cmp::Reverse(*running));

    for (app, (active, running)) in rows {
        println!(
            "{}\t{}\t{}",
            format_duration(*active),
            format_duration(*running),
            app.display_name
        );
    }
    Ok(())
}

async fn resolve(exe: &str, path: Option<&str>) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let resolver = GroupResolver::new(store.clone() as Arc<dyn Store>, Arc::new(DefaultClock));

    match resolver.resolve(exe, path).await? {
        Some(group_id) => {
            let name = store
                .groups()?
                .into_iter()
                .find(|group| group.id == group_id)
                .map(|group| group.name)
                .unwrap_or_else(|| format!("group {group_id}"));
            println!("{exe}\t{name}");
        }
        None => println!("{exe}\tno group matched"),
    }
    Ok(())
}

fn format_duration(v: ChronoDuration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
