use serde::{Deserialize, Serialize};

/// How user whitelist entries are compared against a process.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    /// An entry matches when it appears anywhere in the lower-cased process
    /// name or executable path. Whitelisting `chrome` therefore also allows
    /// `chrome_crashpad_handler` and everything under `/opt/google/chrome/`.
    #[default]
    #[serde(rename = "substring")]
    Substring,

    /// An entry matches only the full process name, the full executable
    /// path, or (for path entries) the executable's file name.
    #[serde(rename = "exact")]
    Exact,
}
