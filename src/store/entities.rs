use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type AppId = i64;
pub type GroupId = i64;
pub type SessionId = i64;
pub type RuleId = i64;

/// What a session measures. Active sessions cover time an application held
/// input focus, running sessions cover time its process merely existed. Every
/// active stretch is also covered by a running session for the same app.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Active,
    Running,
}

impl SessionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Active => "active",
            SessionKind::Running => "running",
        }
    }
}

impl Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionKind::Active),
            "running" => Ok(SessionKind::Running),
            other => Err(format!("unknown session kind {other:?}")),
        }
    }
}

/// One executable as the tracker knows it. Identity is the lowercased
/// executable file name plus, when available, the full path it was first seen
/// at.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct AppIdentityRecord {
    pub id: AppId,
    pub exe_name: String,
    pub exe_path: Option<String>,
    pub display_name: String,
    pub group_id: Option<GroupId>,
    pub is_tracked: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
}

/// A contiguous stretch of recorded time for one app. Open sessions have no
/// end yet; everything else derives from `started_at..ended_at`.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub app_id: AppId,
    pub kind: SessionKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    pub window_title: Option<String>,
    pub machine_id: String,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Recorded span of a closed session, `None` while it is still open.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// A named bucket of related executables, e.g. every Chrome variant under one
/// "Google Chrome" entry. Manual groups were created by the user and win over
/// anything the resolver would decide.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub is_manual: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// How a stored rule pattern is compared against an executable name.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatchKind {
    Exact,
    Prefix,
    Regex,
}

impl RuleMatchKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RuleMatchKind::Exact => "exact",
            RuleMatchKind::Prefix => "prefix",
            RuleMatchKind::Regex => "regex",
        }
    }
}

impl Display for RuleMatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleMatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(RuleMatchKind::Exact),
            "prefix" => Ok(RuleMatchKind::Prefix),
            "regex" => Ok(RuleMatchKind::Regex),
            other => Err(format!("unknown rule match kind {other:?}")),
        }
    }
}

/// User-defined mapping from an executable name pattern to a group.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct GroupRuleRecord {
    pub id: RuleId,
    pub group_id: GroupId,
    pub pattern: String,
    pub match_kind: RuleMatchKind,
    pub is_manual: bool,
}
