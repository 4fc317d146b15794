#![forbid(unsafe_code)]

use crate::policy::builtin::{
    CRITICAL_PROCESSES, SYSTEM_WHITELIST, is_critical, is_system_whitelisted, normalize,
};
use config::MatchMode;
use std::collections::BTreeSet;
use std::path::Path;

/// Which rule let a process keep running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowReason {
    /// No name to match on; nothing is done to such processes.
    Unnamed,
    NameListed,
    PathListed,
    /// The entry occurs inside the process name or executable path.
    Substring(String),
    Critical,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(AllowReason),
    Block,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// The set of names and paths allowed to run during a session.
///
/// Always contains the built-in critical and system tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    entries: BTreeSet<String>,
    mode: MatchMode,
}

impl Whitelist {
    /// Build a substring-matching whitelist from app names and/or paths.
    pub fn new<I, S>(apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_options(apps, MatchMode::Substring, &[])
    }

    pub fn with_options<I, S>(apps: I, mode: MatchMode, always_allow: &[String]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = BTreeSet::new();
        for app in apps {
            let app = normalize(app.as_ref().trim());
            if app.is_empty() {
                continue;
            }
            if app.contains('/')
                && let Some(file_name) = app.rsplit('/').find(|part| !part.is_empty())
            {
                entries.insert(file_name.to_owned());
            }
            entries.insert(app);
        }

        entries.extend(CRITICAL_PROCESSES.iter().map(|name| (*name).to_owned()));
        entries.extend(SYSTEM_WHITELIST.iter().map(|name| (*name).to_owned()));
        entries.extend(
            always_allow
                .iter()
                .map(|name| normalize(name.trim()))
                .filter(|name| !name.is_empty()),
        );

        Self { entries, mode }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(&normalize(entry))
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify a process. Rules are tried in order and the first match wins.
    pub fn decide(&self, name: &str, exe: Option<&Path>) -> Verdict {
        if name.is_empty() {
            return Verdict::Allow(AllowReason::Unnamed);
        }

        let name_lower = normalize(name);
        if self.entries.contains(&name_lower) {
            return Verdict::Allow(AllowReason::NameListed);
        }

        let path_lower = exe
            .map(|exe| normalize(&exe.to_string_lossy()))
            .filter(|path| !path.is_empty());
        if let Some(path) = &path_lower
            && self.entries.contains(path)
        {
            return Verdict::Allow(AllowReason::PathListed);
        }

        // Substring matching needs an executable path; without one only the
        // exact and built-in rules apply.
        if self.mode == MatchMode::Substring
            && let Some(path) = &path_lower
        {
            let hit = self.entries.iter().find(|entry| {
                name_lower.contains(entry.as_str()) || path.contains(entry.as_str())
            });
            if let Some(entry) = hit {
                return Verdict::Allow(AllowReason::Substring(entry.clone()));
            }
        }

        if is_critical(&name_lower) {
            return Verdict::Allow(AllowReason::Critical);
        }
        if is_system_whitelisted(&name_lower) {
            return Verdict::Allow(AllowReason::System);
        }

        Verdict::Block
    }

    pub fn is_allowed(&self, name: &str, exe: Option<&Path>) -> bool {
        self.decide(name, exe).is_allowed()
    }
}

impl Default for Whitelist {
    /// Only the built-in tables.
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

/// Whether `whitelist` lets the process keep running.
pub fn is_allowed(name: &str, exe: Option<&Path>, whitelist: &Whitelist) -> bool {
    whitelist.is_allowed(name, exe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_entries_also_contribute_file_name() {
        let whitelist = Whitelist::new(["/opt/Zotero/zotero", r"C:\Tools\Notepad++.exe"]);
        assert!(whitelist.contains("/opt/zotero/zotero"));
        assert!(whitelist.contains("zotero"));
        assert!(whitelist.contains("notepad++.exe"));
        assert!(whitelist.contains("c:/tools/notepad++.exe"));
    }

    #[test]
    fn blank_entries_are_ignored() {
        let whitelist = Whitelist::new(["", "   "]);
        assert_eq!(whitelist, Whitelist::default());
        assert_eq!(
            whitelist.decide("steam", Some(Path::new("/home/u/.steam/bin/steam"))),
            Verdict::Block
        );
    }

    #[test]
    fn precedence_reports_first_matching_rule() {
        let whitelist = Whitelist::new(["Firefox", "/usr/bin/vim"]);

        assert_eq!(whitelist.decide("", None), Verdict::Allow(AllowReason::Unnamed));
        assert_eq!(
            whitelist.decide("FIREFOX", None),
            Verdict::Allow(AllowReason::NameListed)
        );
        assert_eq!(
            whitelist.decide("vi", Some(Path::new("/usr/bin/vim"))),
            Verdict::Allow(AllowReason::PathListed)
        );
        assert_eq!(
            whitelist.decide("Isolated Web Co", Some(Path::new("/usr/lib/firefox/firefox-bin"))),
            Verdict::Allow(AllowReason::Substring("firefox".into()))
        );
        assert_eq!(
            whitelist.decide("discord", Some(Path::new("/opt/discord/Discord"))),
            Verdict::Block
        );
    }

    #[test]
    fn exact_mode_skips_substring_rule() {
        let whitelist = Whitelist::with_options(["chrome"], MatchMode::Exact, &[]);
        assert!(whitelist.is_allowed("chrome", None));
        assert!(!whitelist.is_allowed(
            "chrome_crashpad_handler",
            Some(Path::new("/opt/google/chrome/chrome_crashpad_handler"))
        ));
        // Built-in tables still apply.
        assert_eq!(
            whitelist.decide("WindowServer", None),
            Verdict::Allow(AllowReason::NameListed)
        );
    }

    #[test]
    fn always_allow_extends_system_table() {
        let whitelist =
            Whitelist::with_options(std::iter::empty::<&str>(), MatchMode::Exact, &["Syncthing".into()]);
        assert!(whitelist.is_allowed("syncthing", None));
    }

    #[test]
    fn pathless_process_skips_substring_rule() {
        let whitelist = Whitelist::default();
        // "sh" and "dock" are built-in entries but only whole names count here.
        assert_eq!(whitelist.decide("flashgame", None), Verdict::Block);
        assert_eq!(whitelist.decide("dockyard", None), Verdict::Block);
        assert!(whitelist.is_allowed("flashgame", Some(Path::new("/opt/flashgame/run"))));
    }

    #[test]
    fn free_function_matches_method() {
        let whitelist = Whitelist::new(["slack"]);
        assert!(is_allowed("slack", None, &whitelist));
        assert!(!is_allowed("spotify", None, &whitelist));
    }
}
