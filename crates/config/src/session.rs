use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Session {
    /// Period of the countdown tick that recomputes elapsed and remaining
    /// time and ends the session once the planned duration is reached.
    /// **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub update_interval: Duration,

    /// Planned length of a session when none is given explicitly.
    /// **Measured in minutes**.
    pub default_duration_minutes: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(1),
            default_duration_minutes: 25,
        }
    }
}
