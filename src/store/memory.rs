use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::settings;

use super::entities::{
    AppId, AppIdentityRecord, GroupId, GroupRecord, GroupRuleRecord, RuleId, RuleMatchKind,
    SessionId, SessionKind, SessionRecord,
};
use super::Store;

/// In-memory [Store]. Holds everything in plain vectors behind one mutex,
/// which is plenty for the write rates the tracker produces (a handful of rows
/// per poll at worst).
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    settings: Vec<(String, String)>,
    apps: Vec<AppIdentityRecord>,
    sessions: Vec<SessionRecord>,
    groups: Vec<GroupRecord>,
    rules: Vec<GroupRuleRecord>,
    next_app_id: AppId,
    next_session_id: SessionId,
    next_group_id: GroupId,
    next_rule_id: RuleId,
}

impl MemoryStore {
    /// Creates a store seeded with the default settings, including a freshly
    /// generated machine id.
    pub fn new() -> Self {
        let mut inner = Inner {
            next_app_id: 1,
            next_session_id: 1,
            next_group_id: 1,
            next_rule_id: 1,
            ..Inner::default()
        };
        inner.settings = vec![
            (settings::POLL_INTERVAL_KEY.into(), json!(5000).to_string()),
            (
                settings::TRACKING_MODE_KEY.into(),
                json!("blacklist").to_string(),
            ),
            (
                settings::MACHINE_ID_KEY.into(),
                json!(Uuid::new_v4().to_string()).to_string(),
            ),
            (settings::RECORD_TITLES_KEY.into(), json!(true).to_string()),
        ];
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("store state poisoned"))
    }

    /// Registers a grouping rule. Rules are normally authored outside the
    /// tracking core, so this lives off the [Store] interface.
    pub fn insert_rule(
        &self,
        group_id: GroupId,
        pattern: &str,
        match_kind: RuleMatchKind,
        manual: bool,
    ) -> Result<RuleId> {
        let mut inner = self.lock()?;
        let id = inner.next_rule_id;
        inner.next_rule_id += 1;
        inner.rules.push(GroupRuleRecord {
            id,
            group_id,
            pattern: pattern.to_owned(),
            match_kind,
            is_manual: manual,
        });
        Ok(id)
    }

    pub fn set_app_tracked(&self, id: AppId, tracked: bool) -> Result<()> {
        let mut inner = self.lock()?;
        let app = inner
            .apps
            .iter_mut()
            .find(|app| app.id == id)
            .ok_or_else(|| anyhow!("no app with id {id}"))?;
        app.is_tracked = tracked;
        Ok(())
    }

    pub fn sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.lock()?.sessions.clone())
    }

    pub fn apps(&self) -> Result<Vec<AppIdentityRecord>> {
        Ok(self.lock()?.apps.clone())
    }

    pub fn groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(self.lock()?.groups.clone())
    }

    pub fn open_session_count(&self) -> Result<usize> {
        Ok(self.lock()?.sessions.iter().filter(|s| s.is_open()).count())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases an executable name and drops a trailing `.exe`, the shape
/// prefix queries compare against.
fn comparable_exe(exe_name: &str) -> String {
    let lowered = exe_name.to_lowercase();
    lowered
        .strip_suffix(".exe")
        .map(str::to_owned)
        .unwrap_or(lowered)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let inner = self.lock()?;
        Ok(inner
            .settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.settings.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_owned(),
            None => inner.settings.push((key.to_owned(), value.to_owned())),
        }
        Ok(())
    }

    async fn upsert_app<'a>(
        &self,
        exe_name: &str,
        exe_path: Option<&'a str>,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<AppId> {
        let mut inner = self.lock()?;
        if let Some(app) = inner
            .apps
            .iter_mut()
            .find(|app| app.exe_name == exe_name && app.exe_path.as_deref() == exe_path)
        {
            app.last_seen = now;
            return Ok(app.id);
        }

        let id = inner.next_app_id;
        inner.next_app_id += 1;
        inner.apps.push(AppIdentityRecord {
            id,
            exe_name: exe_name.to_owned(),
            exe_path: exe_path.map(str::to_owned),
            display_name: display_name.to_owned(),
            group_id: None,
            is_tracked: true,
            first_seen: now,
            last_seen: now,
        });
        Ok(id)
    }

    async fn get_app(&self, id: AppId) -> Result<Option<AppIdentityRecord>> {
        let inner = self.lock()?;
        Ok(inner.apps.iter().find(|app| app.id == id).cloned())
    }

    async fn find_app_by_exe(&self, exe_name: &str) -> Result<Option<AppIdentityRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .apps
            .iter()
            .find(|app| app.exe_name == exe_name)
            .cloned())
    }

    async fn list_apps(&self) -> Result<Vec<AppIdentityRecord>> {
        Ok(self.lock()?.apps.clone())
    }

    async fn list_apps_by_prefix(&self, prefix: &str) -> Result<Vec<AppIdentityRecord>> {
        let prefix = prefix.to_lowercase();
        let inner = self.lock()?;
        Ok(inner
            .apps
            .iter()
            .filter(|app| comparable_exe(&app.exe_name).starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn set_app_path(&self, id: AppId, exe_path: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let app = inner
            .apps
            .iter_mut()
            .find(|app| app.id == id)
            .ok_or_else(|| anyhow!("no app with id {id}"))?;
        app.exe_path = Some(exe_path.to_owned());
        Ok(())
    }

    async fn set_app_group(&self, id: AppId, group_id: Option<GroupId>) -> Result<()> {
        let mut inner = self.lock()?;
        let app = inner
            .apps
            .iter_mut()
            .find(|app| app.id == id)
            .ok_or_else(|| anyhow!("no app with id {id}"))?;
        app.group_id = group_id;
        Ok(())
    }

    async fn insert_session<'a>(
        &self,
        app_id: AppId,
        kind: SessionKind,
        started_at: DateTime<Utc>,
        window_title: Option<&'a str>,
        machine_id: &str,
    ) -> Result<SessionId> {
        let mut inner = self.lock()?;
        let id = inner.next_session_id;
        inner.next_session_id += 1;
        inner.sessions.push(SessionRecord {
            id,
            app_id,
            kind,
            started_at,
            ended_at: None,
            window_title: window_title.map(str::to_owned),
            machine_id: machine_id.to_owned(),
        });
        Ok(id)
    }

    async fn close_session(&self, id: SessionId, ended_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        let session = inner
            .sessions
            .iter_mut()
            .find(|session| session.id == id)
            .ok_or_else(|| anyhow!("no session with id {id}"))?;
        session.ended_at = Some(ended_at);
        Ok(())
    }

    async fn close_sessions(&self, ends: &[(SessionId, DateTime<Utc>)]) -> Result<()> {
        let mut inner = self.lock()?;
        for (id, ended_at) in ends {
            if let Some(session) = inner.sessions.iter_mut().find(|session| session.id == *id) {
                session.ended_at = Some(*ended_at);
            }
        }
        Ok(())
    }

    async fn close_all_open(&self, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        for session in inner.sessions.iter_mut().filter(|session| session.is_open()) {
            session.ended_at = Some(now);
        }
        Ok(())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<GroupRecord>> {
        let inner = self.lock()?;
        Ok(inner.groups.iter().find(|group| group.name == name).cloned())
    }

    async fn create_group(&self, name: &str, manual: bool, now: DateTime<Utc>) -> Result<GroupId> {
        let mut inner = self.lock()?;
        if inner.groups.iter().any(|group| group.name == name) {
            return Err(anyhow!("group {name:?} already exists"));
        }
        let id = inner.next_group_id;
        inner.next_group_id += 1;
        inner.groups.push(GroupRecord {
            id,
            name: name.to_owned(),
            is_manual: manual,
            created_at: now,
        });
        Ok(id)
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(self.lock()?.groups.clone())
    }

    async fn list_manual_rules(&self) -> Result<Vec<GroupRuleRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .rules
            .iter()
            .filter(|rule| rule.is_manual)
            .cloned()
            .collect())
    }

    async fn count_manual_rules_for_group(&self, group_id: GroupId) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner
            .rules
            .iter()
            .filter(|rule| rule.is_manual && rule.group_id == group_id)
            .count())
    }
}

#[cfg(test)]
mod memory_store_tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn seeds_default_settings() -> Result<()> {
        let store = MemoryStore::new();

        assert_eq!(
            store.get_setting(settings::POLL_INTERVAL_KEY).await?,
            Some("5000".into())
        );
        assert_eq!(
            store.get_setting(settings::TRACKING_MODE_KEY).await?,
            Some("\"blacklist\"".into())
        );
        assert_eq!(
            store.get_setting(settings::RECORD_TITLES_KEY).await?,
            Some("true".into())
        );
        let machine_id = store
            .get_setting(settings::MACHINE_ID_KEY)
            .await?
            .expect("machine id should be seeded");
        assert!(machine_id.starts_with('"') && machine_id.ends_with('"'));
        Ok(())
    }

    #[tokio::test]
    async fn upsert_reuses_row_for_same_name_and_path() -> Result<()> {
        let store = MemoryStore::new();

        let first = store
            .upsert_app("chrome.exe", None, "Chrome", at(0))
            .await?;
        let second = store
            .upsert_app("chrome.exe", None, "Chrome", at(10))
            .await?;
        assert_eq!(first, second);

        let app = store.get_app(first).await?.expect("app should exist");
        assert_eq!(app.first_seen, at(0));
        assert_eq!(app.last_seen, at(10));

        let elsewhere = store
            .upsert_app("chrome.exe", Some("D:/other/chrome.exe"), "Chrome", at(20))
            .await?;
        assert_ne!(first, elsewhere);
        Ok(())
    }

    #[tokio::test]
    async fn prefix_listing_strips_exe_suffix() -> Result<()> {
        let store = MemoryStore::new();
        store.upsert_app("myapp-1.exe", None, "Myapp 1", at(0)).await?;
        store.upsert_app("myapp-2.exe", None, "Myapp 2", at(0)).await?;
        store.upsert_app("other.exe", None, "Other", at(0)).await?;
        store
            .upsert_app("steam:440", None, "Team Fortress 2", at(0))
            .await?;

        let family = store.list_apps_by_prefix("myapp").await?;
        assert_eq!(family.len(), 2);

        let imports = store.list_apps_by_prefix("steam:").await?;
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].display_name, "Team Fortress 2");
        Ok(())
    }

    #[tokio::test]
    async fn close_all_open_only_touches_open_sessions() -> Result<()> {
        let store = MemoryStore::new();
        let app = store.upsert_app("a.exe", None, "A", at(0)).await?;

        let closed = store
            .insert_session(app, SessionKind::Running, at(0), None, "m1")
            .await?;
        store.close_session(closed, at(5)).await?;
        store
            .insert_session(app, SessionKind::Active, at(10), None, "m1")
            .await?;

        store.close_all_open(at(30)).await?;

        let sessions = store.sessions()?;
        assert_eq!(sessions[0].ended_at, Some(at(5)));
        assert_eq!(sessions[1].ended_at, Some(at(30)));
        assert_eq!(store.open_session_count()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_group_name_is_rejected() -> Result<()> {
        let store = MemoryStore::new();
        store.create_group("Blender", false, at(0)).await?;
        assert!(store.create_group("Blender", true, at(1)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn manual_rule_count_ignores_auto_rules() -> Result<()> {
        let store = MemoryStore::new();
        let group = store.create_group("Chrome", true, at(0)).await?;
        store.insert_rule(group, "chrome", RuleMatchKind::Exact, true)?;
        store.insert_rule(group, "chromium", RuleMatchKind::Prefix, false)?;

        assert_eq!(store.count_manual_rules_for_group(group).await?, 1);
        assert_eq!(store.list_manual_rules().await?.len(), 1);
        Ok(())
    }
}
