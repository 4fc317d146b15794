use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Persistence {
    /// SQLite database holding session history and blocked-app counts.
    ///
    /// When unset, the front-end picks its own default location.
    pub database: Option<PathBuf>,
}
