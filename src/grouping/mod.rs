//! Assigns executables to semantic groups. A fixed cascade of matcher stages
//! runs in order for every unresolved executable; the first stage to claim it
//! wins and later stages are never consulted.

pub mod distance;
pub mod known_apps;
pub mod matchers;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    store::{entities::GroupId, Store},
    utils::clock::Clock,
};

use matchers::{
    CatalogPathMatcher, GroupMatcher, KnownAppMatcher, ManualRuleMatcher, ResolveRequest,
    RuleCache, SiblingFamilyMatcher, VersionFuzzyMatcher,
};

pub struct GroupResolver {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    rule_cache: Arc<Mutex<RuleCache>>,
    matchers: Vec<Box<dyn GroupMatcher>>,
}

impl GroupResolver {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let rule_cache = Arc::new(Mutex::new(RuleCache::default()));
        let matchers: Vec<Box<dyn GroupMatcher>> = vec![
            Box::new(ManualRuleMatcher::new(Arc::clone(&rule_cache))),
            Box::new(KnownAppMatcher),
            Box::new(CatalogPathMatcher),
            Box::new(VersionFuzzyMatcher),
            Box::new(SiblingFamilyMatcher),
        ];
        Self {
            store,
            clock,
            rule_cache,
            matchers,
        }
    }

    /// Runs the cascade for one executable. `None` means no stage claimed it
    /// and the app stays ungrouped.
    pub async fn resolve(&self, exe_name: &str, exe_path: Option<&str>) -> Result<Option<GroupId>> {
        let request = ResolveRequest::new(exe_name, exe_path, self.clock.time());
        for matcher in &self.matchers {
            if let Some(group) = matcher.try_resolve(self.store.as_ref(), &request).await? {
                debug!("Resolved {exe_name:?} to group {group} via {}", matcher.name());
                return Ok(Some(group));
            }
        }
        debug!("No group matched {exe_name:?}");
        Ok(None)
    }

    /// Drops the manual-rule cache so the next resolution rebuilds it from
    /// the store. Must be called after rules change.
    pub async fn invalidate_rule_cache(&self) {
        self.rule_cache.lock().await.invalidate();
    }

    /// Re-runs the cascade for every identity whose current group is not
    /// pinned by a manual rule, persisting each outcome, including explicit
    /// un-grouping when no stage matches anymore.
    pub async fn reanalyze_groups(&self) -> Result<()> {
        self.invalidate_rule_cache().await;

        for app in self.store.list_apps().await? {
            if let Some(group_id) = app.group_id {
                if self.store.count_manual_rules_for_group(group_id).await? > 0 {
                    continue;
                }
            }
            let resolved = self.resolve(&app.exe_name, app.exe_path.as_deref()).await?;
            self.store.set_app_group(app.id, resolved).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod resolver_tests {
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::Instant;

    use crate::store::{
        entities::RuleMatchKind,
        memory::MemoryStore,
    };
    use crate::utils::logging::TEST_LOGGING;

    use super::*;

    struct FixedClock(DateTime<Utc>);

    #[async_trait]
    impl Clock for FixedClock {
        fn time(&self) -> DateTime<Utc> {
            self.0
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, _instant: Instant) {}
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn resolver() -> (Arc<MemoryStore>, GroupResolver) {
        *TEST_LOGGING;
        let store = Arc::new(MemoryStore::new());
        let resolver = GroupResolver::new(store.clone(), Arc::new(FixedClock(now())));
        (store, resolver)
    }

    #[tokio::test]
    async fn dictionary_creates_group_once_and_reuses_it() -> Result<()> {
        let (store, resolver) = resolver();

        let first = resolver.resolve("blender.exe", None).await?;
        let second = resolver.resolve("blender-4.2.exe", None).await?;
        assert_eq!(first, second);
        assert!(first.is_some());

        let groups = store.groups()?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Blender");
        assert!(!groups[0].is_manual);
        Ok(())
    }

    #[tokio::test]
    async fn manual_rule_wins_over_dictionary() -> Result<()> {
        let (store, resolver) = resolver();
        let custom = store.create_group("My 3D Work", true, now()).await?;
        store.insert_rule(custom, "blender.exe", RuleMatchKind::Exact, true)?;

        assert_eq!(resolver.resolve("blender.exe", None).await?, Some(custom));
        // No "Blender" auto group should have been created along the way.
        assert_eq!(store.groups()?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn manual_rule_matches_extension_stripped_stem() -> Result<()> {
        let (store, resolver) = resolver();
        let group = store.create_group("Browsing", true, now()).await?;
        store.insert_rule(group, "chrome", RuleMatchKind::Exact, true)?;

        assert_eq!(resolver.resolve("Chrome.EXE", None).await?, Some(group));
        Ok(())
    }

    #[tokio::test]
    async fn rule_cache_is_stale_until_invalidated() -> Result<()> {
        let (store, resolver) = resolver();

        assert_eq!(resolver.resolve("zzztool.exe", None).await?, None);

        let group = store.create_group("Tools", true, now()).await?;
        store.insert_rule(group, "zzztool.exe", RuleMatchKind::Exact, true)?;

        // The cache was built before the rule existed.
        assert_eq!(resolver.resolve("zzztool.exe", None).await?, None);

        resolver.invalidate_rule_cache().await;
        assert_eq!(resolver.resolve("zzztool.exe", None).await?, Some(group));
        Ok(())
    }

    #[tokio::test]
    async fn dictionary_wins_over_similarly_named_group() -> Result<()> {
        let (store, resolver) = resolver();
        let lookalike = store.create_group("Blend", false, now()).await?;

        let resolved = resolver.resolve("blender.exe", None).await?;
        assert_ne!(resolved, Some(lookalike));

        let groups = store.groups()?;
        assert!(groups.iter().any(|g| g.name == "Blender"));
        Ok(())
    }

    #[tokio::test]
    async fn version_stripping_reaches_existing_group() -> Result<()> {
        let (store, resolver) = resolver();
        let chrome = store.create_group("Chrome", false, now()).await?;

        assert_eq!(
            resolver.resolve("chrome 2024.exe", None).await?,
            Some(chrome)
        );
        Ok(())
    }

    #[tokio::test]
    async fn catalog_path_groups_codename_executable() -> Result<()> {
        let (store, resolver) = resolver();
        let import = store
            .upsert_app("steam:1808500", None, "Arc Raiders", now())
            .await?;

        let resolved = resolver
            .resolve(
                "pioneergame.exe",
                Some(r"C:\Games\steamapps\common\ArcRaiders\pioneergame.exe"),
            )
            .await?;

        let group = resolved.expect("catalog stage should match");
        let groups = store.groups()?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Arc Raiders");

        // The import itself gets pulled into the new group.
        let import = store.get_app(import).await?.expect("import should exist");
        assert_eq!(import.group_id, Some(group));
        Ok(())
    }

    #[tokio::test]
    async fn catalog_match_respects_distance_threshold() -> Result<()> {
        let (store, resolver) = resolver();
        store.upsert_app("steam:400", None, "Portal", now()).await?;

        // "portal2" vs "portal" is one edit over seven characters, just past
        // the 0.1 ceiling.
        let resolved = resolver
            .resolve(
                "portal2.exe",
                Some(r"C:\Games\steamapps\common\Portal 2\portal2.exe"),
            )
            .await?;

        assert_eq!(resolved, None);
        assert!(store.groups()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn sibling_family_forms_group() -> Result<()> {
        let (store, resolver) = resolver();
        store.upsert_app("myapp-1.exe", None, "Myapp 1", now()).await?;
        store.upsert_app("myapp-2.exe", None, "Myapp 2", now()).await?;
        store.upsert_app("myapp-3.exe", None, "Myapp 3", now()).await?;

        let resolved = resolver.resolve("myapp-3.exe", None).await?;
        assert!(resolved.is_some());

        let groups = store.groups()?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Myapp");
        Ok(())
    }

    #[tokio::test]
    async fn sibling_family_needs_two_other_identities() -> Result<()> {
        let (store, resolver) = resolver();
        store.upsert_app("myapp-1.exe", None, "Myapp 1", now()).await?;
        store.upsert_app("myapp-2.exe", None, "Myapp 2", now()).await?;

        // Only one identity besides the one being resolved.
        assert_eq!(resolver.resolve("myapp-2.exe", None).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn reanalysis_skips_manual_rule_backed_groups() -> Result<()> {
        let (store, resolver) = resolver();
        let pinned = store.create_group("My 3D Work", true, now()).await?;
        store.insert_rule(pinned, "handmade", RuleMatchKind::Exact, true)?;

        let app = store.upsert_app("blender.exe", None, "Blender", now()).await?;
        store.set_app_group(app, Some(pinned)).await?;

        resolver.reanalyze_groups().await?;

        // Without the manual rule the dictionary would have moved this app to
        // a fresh "Blender" group.
        let app = store.get_app(app).await?.expect("app should exist");
        assert_eq!(app.group_id, Some(pinned));
        Ok(())
    }

    #[tokio::test]
    async fn reanalysis_regroups_and_ungroups() -> Result<()> {
        let (store, resolver) = resolver();

        let ungrouped = store.upsert_app("blender.exe", None, "Blender", now()).await?;

        let stale = store.create_group("Random Group", false, now()).await?;
        let misfiled = store.upsert_app("zzzz.exe", None, "Zzzz", now()).await?;
        store.set_app_group(misfiled, Some(stale)).await?;

        resolver.reanalyze_groups().await?;

        let apps = store.apps()?;
        let blender = apps.iter().find(|a| a.id == ungrouped).unwrap();
        assert!(blender.group_id.is_some());

        let zzzz = apps.iter().find(|a| a.id == misfiled).unwrap();
        assert_eq!(zzzz.group_id, None);
        Ok(())
    }
}
