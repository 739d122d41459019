//! Persistence seam for the tracking core. The core only ever talks to
//! [Store]; what sits behind it (a database, a file, test memory) is not its
//! concern. [memory::MemoryStore] is the bundled implementation.

pub mod entities;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use entities::{
    AppId, AppIdentityRecord, GroupId, GroupRecord, GroupRuleRecord, SessionId, SessionKind,
};

/// Operations the tracking core needs from persistent storage. Each call is
/// atomic on its own; the core never asks for cross-call transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Raw JSON-encoded value for a settings key, `None` when unset.
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the identity keyed by `(exe_name, exe_path)`, creating it when
    /// absent. An existing row only gets its `last_seen` refreshed.
    async fn upsert_app<'a>(
        &self,
        exe_name: &str,
        exe_path: Option<&'a str>,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<AppId>;

    async fn get_app(&self, id: AppId) -> Result<Option<AppIdentityRecord>>;

    /// First identity whose executable name matches, ignoring the path.
    async fn find_app_by_exe(&self, exe_name: &str) -> Result<Option<AppIdentityRecord>>;

    async fn list_apps(&self) -> Result<Vec<AppIdentityRecord>>;

    /// Identities whose lowercased executable name, with a trailing `.exe`
    /// stripped, starts with `prefix`.
    async fn list_apps_by_prefix(&self, prefix: &str) -> Result<Vec<AppIdentityRecord>>;

    async fn set_app_path(&self, id: AppId, exe_path: &str) -> Result<()>;

    async fn set_app_group(&self, id: AppId, group_id: Option<GroupId>) -> Result<()>;

    async fn insert_session<'a>(
        &self,
        app_id: AppId,
        kind: SessionKind,
        started_at: DateTime<Utc>,
        window_title: Option<&'a str>,
        machine_id: &str,
    ) -> Result<SessionId>;

    async fn close_session(&self, id: SessionId, ended_at: DateTime<Utc>) -> Result<()>;

    /// Closes every listed session at its paired end time, all in one call.
    async fn close_sessions(&self, ends: &[(SessionId, DateTime<Utc>)]) -> Result<()>;

    /// Closes whatever is still open at `now`. Catches rows the in-memory
    /// handle tables lost track of, e.g. after a failed write.
    async fn close_all_open(&self, now: DateTime<Utc>) -> Result<()>;

    async fn find_group_by_name(&self, name: &str) -> Result<Option<GroupRecord>>;

    async fn create_group(&self, name: &str, manual: bool, now: DateTime<Utc>) -> Result<GroupId>;

    async fn list_groups(&self) -> Result<Vec<GroupRecord>>;

    /// Rules flagged manual, the source of the resolver's rule cache.
    async fn list_manual_rules(&self) -> Result<Vec<GroupRuleRecord>>;

    /// How many manual rules point at `group_id`. Group assignments backed by
    /// at least one manual rule are off-limits to re-analysis.
    async fn count_manual_rules_for_group(&self, group_id: GroupId) -> Result<usize>;
}
