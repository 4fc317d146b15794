use crate::match_mode::MatchMode;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Enforcement {
    /// How often the live process list is scanned for newly launched,
    /// non-whitelisted processes. **Measured in seconds**.
    ///
    /// ## Note
    ///
    /// A scan walks all of `/proc`. Values below one second buy very little
    /// since most applications take longer than that to draw a window.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub scan_interval: Duration,

    /// How long a process is given to exit after the graceful termination
    /// request before it is force-killed. **Measured in milliseconds**.
    ///
    /// The scan that issued the termination is blocked for at most this long
    /// per process.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub termination_grace: Duration,

    /// How whitelist entries are compared against process names and paths.
    ///
    /// See [`MatchMode`] for possible values.
    pub match_mode: MatchMode,

    /// Additional process names that are always left running, on top of the
    /// built-in system whitelist. Matching is case-insensitive.
    pub always_allow: Vec<String>,
}

impl Default for Enforcement {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            termination_grace: Duration::from_millis(1000),
            match_mode: MatchMode::Substring,
            always_allow: Vec::new(),
        }
    }
}
