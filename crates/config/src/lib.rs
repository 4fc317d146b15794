#![forbid(unsafe_code)]

mod enforcement;
mod error;
mod match_mode;
mod persistence;
mod session;

pub use enforcement::Enforcement;
pub use error::Error;
pub use match_mode::MatchMode;
pub use persistence::Persistence;
pub use session::Session;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variables that override file configuration, e.g.
/// `LOCKIN_ENFORCEMENT__SCAN_INTERVAL=2`.
pub const ENV_PREFIX: &str = "LOCKIN_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub enforcement: Enforcement,
    pub session: Session,
    pub persistence: Persistence,
}

impl Config {
    /// Layer defaults, the given TOML files (missing ones are skipped) and
    /// `LOCKIN_*` environment variables, in that order of precedence.
    pub fn extract<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        for path in paths {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.apply_defaults();
        Ok(config)
    }

    /// Render the configuration as a TOML document that [`Config::extract`]
    /// reads back unchanged.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    fn apply_defaults(&mut self) {
        // Entries are compared lower-cased; blank ones would match everything.
        self.enforcement.always_allow = self
            .enforcement
            .always_allow
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        self.enforcement.always_allow.sort();
        self.enforcement.always_allow.dedup();
    }
}
