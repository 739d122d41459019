//! Read-only views of the operating system: which window holds focus, which
//! processes exist, how long the user has been inactive. Everything behind
//! these traits may fail or come back empty at any time and the tracker has
//! to shrug that off.

pub mod process_list;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Snapshot of the currently focused window.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveWindowInfo {
    /// Lowercased file name of the owning executable, e.g. `chrome.exe`.
    pub exe_name: String,
    /// Full path to the executable when the platform exposes it.
    pub exe_path: Option<String>,
    pub window_title: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunningProcess {
    /// Lowercased file name of the executable.
    pub exe_name: String,
    pub pid: u32,
}

/// Focus and input-idle observation for one platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActiveWindowProbe: Send + Sync {
    /// The focused window, or `None` when nothing usable holds focus.
    async fn poll(&mut self) -> Result<Option<ActiveWindowInfo>>;

    /// Time since the last user input.
    fn idle_time(&mut self) -> Result<Duration>;
}

/// Enumeration of every process currently alive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessListProbe: Send + Sync {
    async fn poll(&mut self) -> Result<Vec<RunningProcess>>;
}

/// The probe pair the tracker observes the system through.
pub struct TrackerProbes {
    pub active: Box<dyn ActiveWindowProbe>,
    pub processes: Box<dyn ProcessListProbe>,
}

/// Stand-in for platforms without a focus binding wired up. Never reports a
/// focused window or idle time, which leaves only running-session tracking.
pub struct DisabledActiveWindowProbe;

#[async_trait]
impl ActiveWindowProbe for DisabledActiveWindowProbe {
    async fn poll(&mut self) -> Result<Option<ActiveWindowInfo>> {
        Ok(None)
    }

    fn idle_time(&mut self) -> Result<Duration> {
        Ok(Duration::ZERO)
    }
}
