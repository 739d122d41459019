use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{
    entities::{AppIdentityRecord, GroupId, GroupRuleRecord},
    Store,
};

use super::{
    distance::{normalize_compact, normalized_distance},
    known_apps::{strip_version_suffixes, KNOWN_APP_RULES},
};

/// Synthetic executable-name prefix shared by catalog-imported identities.
pub const CATALOG_IMPORT_PREFIX: &str = "steam:";

const CATALOG_MATCH_THRESHOLD: f64 = 0.1;
const FUZZY_MATCH_THRESHOLD: f64 = 0.25;
const MIN_CANDIDATE_LEN: usize = 3;
const MIN_SIBLINGS: usize = 2;

/// One executable observation, pre-normalized once for the whole cascade.
pub struct ResolveRequest {
    /// Full lowercased executable name.
    pub exe_full: String,
    /// Lowercased name with a trailing `.exe` stripped.
    pub exe_stem: String,
    pub exe_path: Option<String>,
    pub now: DateTime<Utc>,
}

impl ResolveRequest {
    pub fn new(exe_name: &str, exe_path: Option<&str>, now: DateTime<Utc>) -> Self {
        let exe_full = exe_name.to_lowercase();
        let exe_stem = exe_full
            .strip_suffix(".exe")
            .map(str::to_owned)
            .unwrap_or_else(|| exe_full.clone());
        Self {
            exe_full,
            exe_stem,
            exe_path: exe_path.map(str::to_owned),
            now,
        }
    }

    /// Version-stripped name the fuzzy stages work on, `None` when what is
    /// left is too short to mean anything.
    fn fuzzy_candidate(&self) -> Option<String> {
        let candidate = strip_version_suffixes(&self.exe_stem);
        if candidate.chars().count() < MIN_CANDIDATE_LEN {
            return None;
        }
        Some(candidate)
    }
}

/// A single stage of the resolution cascade.
#[async_trait]
pub trait GroupMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some(group)` claims the request and stops the cascade.
    async fn try_resolve(
        &self,
        store: &dyn Store,
        request: &ResolveRequest,
    ) -> Result<Option<GroupId>>;
}

/// Finds a group by name, creating it as an auto group when absent.
pub(super) async fn ensure_group(
    store: &dyn Store,
    name: &str,
    now: DateTime<Utc>,
) -> Result<GroupId> {
    if let Some(group) = store.find_group_by_name(name).await? {
        return Ok(group.id);
    }
    store.create_group(name, false, now).await
}

/// Lazily built `lowercased pattern → group` index over the manual rules.
#[derive(Default)]
pub(super) struct RuleCache {
    built: bool,
    by_pattern: HashMap<String, GroupId>,
}

impl RuleCache {
    pub(super) fn invalidate(&mut self) {
        self.by_pattern.clear();
        self.built = false;
    }

    fn rebuild(&mut self, rules: &[GroupRuleRecord]) {
        self.by_pattern.clear();
        for rule in rules {
            self.by_pattern
                .insert(rule.pattern.to_lowercase(), rule.group_id);
        }
        self.built = true;
    }
}

/// Stage 1: user-authored rules, matched against the full name and the stem.
pub(super) struct ManualRuleMatcher {
    cache: Arc<Mutex<RuleCache>>,
}

impl ManualRuleMatcher {
    pub(super) fn new(cache: Arc<Mutex<RuleCache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl GroupMatcher for ManualRuleMatcher {
    fn name(&self) -> &'static str {
        "manual-rule"
    }

    async fn try_resolve(
        &self,
        store: &dyn Store,
        request: &ResolveRequest,
    ) -> Result<Option<GroupId>> {
        let mut cache = self.cache.lock().await;
        if !cache.built {
            let rules = store.list_manual_rules().await?;
            debug!("Rebuilding manual rule cache from {} rules", rules.len());
            cache.rebuild(&rules);
        }
        Ok(cache
            .by_pattern
            .get(&request.exe_full)
            .or_else(|| cache.by_pattern.get(&request.exe_stem))
            .copied())
    }
}

/// Stage 2: the curated known-application dictionary.
pub(super) struct KnownAppMatcher;

#[async_trait]
impl GroupMatcher for KnownAppMatcher {
    fn name(&self) -> &'static str {
        "known-app"
    }

    async fn try_resolve(
        &self,
        store: &dyn Store,
        request: &ResolveRequest,
    ) -> Result<Option<GroupId>> {
        for rule in KNOWN_APP_RULES.iter() {
            if rule.matches(&request.exe_full) || rule.matches(&request.exe_stem) {
                return Ok(Some(
                    ensure_group(store, rule.group_name, request.now).await?,
                ));
            }
        }
        Ok(None)
    }
}

static LIBRARY_FOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)steamapps[\\/]common[\\/]([^\\/]+)").expect("library path pattern must compile")
});

/// Stage 3: executables living under a `steamapps/common/<Folder>` library
/// directory are matched against catalog-imported identities by folder name.
/// This is how codename executables (`pioneergame.exe` inside an `ArcRaiders`
/// folder) end up grouped with their library entry.
pub(super) struct CatalogPathMatcher;

#[async_trait]
impl GroupMatcher for CatalogPathMatcher {
    fn name(&self) -> &'static str {
        "catalog-path"
    }

    async fn try_resolve(
        &self,
        store: &dyn Store,
        request: &ResolveRequest,
    ) -> Result<Option<GroupId>> {
        let Some(path) = request.exe_path.as_deref() else {
            return Ok(None);
        };
        let Some(captures) = LIBRARY_FOLDER_RE.captures(path) else {
            return Ok(None);
        };
        let folder = normalize_compact(&captures[1]);

        let mut best: Option<(AppIdentityRecord, f64)> = None;
        for import in store.list_apps_by_prefix(CATALOG_IMPORT_PREFIX).await? {
            let dist = normalized_distance(&folder, &normalize_compact(&import.display_name));
            if dist <= CATALOG_MATCH_THRESHOLD && best.as_ref().map_or(true, |(_, d)| dist < *d) {
                best = Some((import, dist));
            }
        }
        let Some((import, _)) = best else {
            return Ok(None);
        };

        if let Some(group) = import.group_id {
            return Ok(Some(group));
        }
        // First executable observed for this import: group them both under
        // the import's display name.
        let group = ensure_group(store, &import.display_name, request.now).await?;
        store.set_app_group(import.id, Some(group)).await?;
        Ok(Some(group))
    }
}

/// Stage 4: version-stripped name fuzzy-matched against existing group names.
pub(super) struct VersionFuzzyMatcher;

#[async_trait]
impl GroupMatcher for VersionFuzzyMatcher {
    fn name(&self) -> &'static str {
        "version-fuzzy"
    }

    async fn try_resolve(
        &self,
        store: &dyn Store,
        request: &ResolveRequest,
    ) -> Result<Option<GroupId>> {
        let Some(candidate) = request.fuzzy_candidate() else {
            return Ok(None);
        };

        let mut best: Option<(GroupId, f64)> = None;
        for group in store.list_groups().await? {
            let dist = normalized_distance(&candidate, &group.name.to_lowercase());
            if dist <= FUZZY_MATCH_THRESHOLD && best.map_or(true, |(_, d)| dist < d) {
                best = Some((group.id, dist));
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}

/// Stage 5: when enough other identities share the candidate as a name
/// prefix, the whole family gets a group named after it.
pub(super) struct SiblingFamilyMatcher;

#[async_trait]
impl GroupMatcher for SiblingFamilyMatcher {
    fn name(&self) -> &'static str {
        "sibling-family"
    }

    async fn try_resolve(
        &self,
        store: &dyn Store,
        request: &ResolveRequest,
    ) -> Result<Option<GroupId>> {
        let Some(candidate) = request.fuzzy_candidate() else {
            return Ok(None);
        };
        let siblings = store.list_apps_by_prefix(&candidate).await?;
        let others = siblings
            .iter()
            .filter(|app| app.exe_name != request.exe_full)
            .count();
        if others < MIN_SIBLINGS {
            return Ok(None);
        }
        Ok(Some(
            ensure_group(store, &title_case_words(&candidate), request.now).await?,
        ))
    }
}

/// "counter-strike" → "Counter Strike".
fn title_case_words(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod matcher_tests {
    use super::*;

    #[test]
    fn request_normalizes_name_and_stem() {
        let request = ResolveRequest::new("Chrome.EXE", None, Utc::now());
        assert_eq!(request.exe_full, "chrome.exe");
        assert_eq!(request.exe_stem, "chrome");
    }

    #[test]
    fn short_candidates_are_rejected() {
        // "go 2" strips down to "go", below the three character floor.
        let request = ResolveRequest::new("go 2.exe", None, Utc::now());
        assert_eq!(request.fuzzy_candidate(), None);

        let request = ResolveRequest::new("myapp-3.exe", None, Utc::now());
        assert_eq!(request.fuzzy_candidate(), Some("myapp".into()));
    }

    #[test]
    fn title_casing_splits_on_separators() {
        assert_eq!(title_case_words("counter-strike"), "Counter Strike");
        assert_eq!(title_case_words("my_app suite"), "My App Suite");
    }

    #[test]
    fn library_folder_is_extracted_from_both_separator_styles() {
        let captures = LIBRARY_FOLDER_RE
            .captures(r"C:\Games\steamapps\common\ArcRaiders\pioneergame.exe")
            .expect("backslash path should match");
        assert_eq!(&captures[1], "ArcRaiders");

        let captures = LIBRARY_FOLDER_RE
            .captures("/home/u/.steam/steamapps/common/Celeste/Celeste.bin.x86_64")
            .expect("slash path should match");
        assert_eq!(&captures[1], "Celeste");
    }
}
