use std::sync::LazyLock;

use regex::Regex;

/// One curated entry: a display-worthy group name plus the executable name
/// patterns that identify it.
pub struct KnownAppRule {
    pub group_name: &'static str,
    patterns: Vec<Regex>,
}

impl KnownAppRule {
    fn new(group_name: &'static str, patterns: &[&str]) -> Self {
        Self {
            group_name,
            patterns: patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("(?i){p}")).expect("known-app pattern must compile")
                })
                .collect(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(name))
    }
}

/// Curated dictionary of common applications, checked in order. Earlier
/// entries shadow later ones, so `unrealengine` belongs to Epic Games rather
/// than Unreal Engine.
pub static KNOWN_APP_RULES: LazyLock<Vec<KnownAppRule>> = LazyLock::new(|| {
    let rule = KnownAppRule::new;
    vec![
        rule("Blender", &[r"^blender"]),
        rule(
            "VS Code",
            &[r"^code$", r"^code - insiders", r"^vscodium", r"^code\.exe$"],
        ),
        rule(
            "Google Chrome",
            &[r"^chrome\.exe$", r"^chrome$", r"^chromium"],
        ),
        rule("Firefox", &[r"^firefox"]),
        rule("Microsoft Edge", &[r"^msedge", r"^microsoftedge"]),
        rule("Discord", &[r"^discord"]),
        rule("Slack", &[r"^slack"]),
        rule("Spotify", &[r"^spotify"]),
        rule("Steam", &[r"^steam\.exe$", r"^steamwebhelper"]),
        rule("Epic Games", &[r"^epicgameslauncher", r"^unrealengine"]),
        rule("OBS Studio", &[r"^obs64", r"^obs32", r"^obs\.exe$"]),
        rule("Adobe Photoshop", &[r"^photoshop"]),
        rule("Adobe Premiere", &[r"^premiere", r"^adobepremiere"]),
        rule("Adobe After Effects", &[r"^afterfx", r"^after effects"]),
        rule("Adobe Illustrator", &[r"^illustrator"]),
        rule("DaVinci Resolve", &[r"^davinci", r"^resolve"]),
        rule("Unity", &[r"^unity(hub)?"]),
        rule(
            "Unreal Engine",
            &[r"^unrealengine", r"^ue4editor", r"^ue5editor"],
        ),
        rule("Figma", &[r"^figma"]),
        rule("Notion", &[r"^notion"]),
        rule("Obsidian", &[r"^obsidian"]),
        rule("VLC", &[r"^vlc"]),
        rule("Windows Explorer", &[r"^explorer\.exe$"]),
        rule("Task Manager", &[r"^taskmgr"]),
        rule("PowerShell", &[r"^powershell", r"^pwsh"]),
        rule("Command Prompt", &[r"^cmd\.exe$"]),
        rule("Windows Terminal", &[r"^windowsterminal", r"^wt\.exe$"]),
        rule("Notepad", &[r"^notepad"]),
        rule("Microsoft Word", &[r"^winword"]),
        rule("Microsoft Excel", &[r"^excel"]),
        rule("Microsoft PowerPoint", &[r"^powerpnt"]),
        rule("Zoom", &[r"^zoom"]),
        rule("Teams", &[r"^teams"]),
        rule("Rider", &[r"^rider", r"^rider64"]),
        rule("CLion", &[r"^clion", r"^clion64"]),
        rule("PyCharm", &[r"^pycharm"]),
        rule("IntelliJ IDEA", &[r"^idea", r"^idea64"]),
        rule("WebStorm", &[r"^webstorm"]),
        rule("Godot", &[r"^godot"]),
        rule("Krita", &[r"^krita"]),
        rule("GIMP", &[r"^gimp"]),
        rule("Audacity", &[r"^audacity"]),
        rule("VirtualBox", &[r"^virtualbox", r"^vboxmanage"]),
        rule("VMware", &[r"^vmware"]),
        rule("Git", &[r"^git\.exe$", r"^git-bash"]),
    ]
});

/// Trailing decorations cut off executable names before fuzzy matching:
/// version numbers, release-channel tags, architecture markers, year suffixes
/// and installer/setup/portable tails. Each pattern is applied once, in
/// order.
pub static VERSION_SUFFIX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)[\s\-_v](\d+[\.\d]*)(\s*(alpha|beta|rc|lts|stable|preview))?$",
        r"\s+\d{4}$",
        r"(?i)[\s\-_](x64|x86|64[\-_]?bit|32[\-_]?bit)$",
        r"(?i)\s+\(64[\-_]?bit\)$",
        r"(?i)[\s\-_](installer|setup|portable)$",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("version suffix pattern must compile"))
    .collect()
});

pub fn strip_version_suffixes(name: &str) -> String {
    let mut result = name.to_owned();
    for pattern in VERSION_SUFFIX_PATTERNS.iter() {
        result = pattern.replace(&result, "").into_owned();
    }
    result.trim().to_owned()
}

#[cfg(test)]
mod known_apps_tests {
    use super::*;

    fn dictionary_match(name: &str) -> Option<&'static str> {
        KNOWN_APP_RULES
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.group_name)
    }

    #[test]
    fn prefix_and_exact_patterns() {
        assert_eq!(dictionary_match("blender"), Some("Blender"));
        assert_eq!(dictionary_match("blender-4.2"), Some("Blender"));
        assert_eq!(dictionary_match("chrome.exe"), Some("Google Chrome"));
        assert_eq!(dictionary_match("codeblocks"), None);
        assert_eq!(dictionary_match("code"), Some("VS Code"));
    }

    #[test]
    fn earlier_rules_shadow_later_ones() {
        assert_eq!(dictionary_match("unrealengine"), Some("Epic Games"));
        assert_eq!(dictionary_match("ue5editor"), Some("Unreal Engine"));
    }

    #[test]
    fn version_suffixes_are_stripped_in_order() {
        assert_eq!(strip_version_suffixes("chrome 2024"), "chrome");
        assert_eq!(strip_version_suffixes("app v1.2"), "app");
        assert_eq!(strip_version_suffixes("blender-x64"), "blender");
        assert_eq!(strip_version_suffixes("tool-setup"), "tool");
        assert_eq!(strip_version_suffixes("app 1.5 beta"), "app");
        assert_eq!(strip_version_suffixes("studio (64-bit)"), "studio");
    }

    #[test]
    fn each_pattern_applies_only_once() {
        // The year pattern already ran by the time the parenthesised
        // architecture tail is removed, so the year survives.
        assert_eq!(
            strip_version_suffixes("photoshop 2023 (64-bit)"),
            "photoshop 2023"
        );
    }
}
