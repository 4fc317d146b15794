use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use config::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest session accepted on the command line, in minutes.
const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// lockin: stay on task
///
/// Runs a timed focus session during which every app that is not on the
/// whitelist is closed as soon as it starts.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/lockin/config.toml`, `/etc/lockin/config.d/*.toml` and
    /// `$XDG_CONFIG_HOME/lockin/config.toml`, later files overriding earlier
    /// ones. `LOCKIN_*` environment variables override all of them.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// Session database.
    ///
    /// Defaults to `persistence.database` from the configuration, then to
    /// `~/.lockin/lockin.db`.
    #[arg(short, long, conflicts_with = "no_persist")]
    pub database: Option<PathBuf>,

    /// Keep session history in memory only.
    #[arg(long)]
    pub no_persist: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start a focus session and enforce it until it ends.
    Start(StartArgs),

    /// List running apps that can be whitelisted.
    Apps {
        /// Include OS services and helpers.
        #[arg(short, long)]
        all: bool,
    },

    /// Show recent sessions.
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: u32,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Args, Clone)]
pub struct StartArgs {
    /// Session name.
    #[arg(short, long)]
    pub name: String,

    /// Session length in minutes.
    ///
    /// Defaults to `session.default_duration_minutes` from the configuration.
    #[arg(short = 't', long, value_parser = validate_duration)]
    pub duration: Option<u32>,

    /// App name or executable path allowed to keep running. Repeatable.
    #[arg(short, long = "allow", value_name = "APP")]
    pub allow: Vec<String>,

    /// Free-text description stored with the session.
    #[arg(long)]
    pub description: Option<String>,

    /// Only report what would be closed.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Where session history lives, or `None` when it is kept in memory.
    pub fn database_path(&self, config: &Config) -> Option<PathBuf> {
        if self.no_persist {
            return None;
        }
        self.database
            .clone()
            .or_else(|| config.persistence.database.clone())
            .or_else(|| dirs::home_dir().map(|home| home.join(".lockin").join("lockin.db")))
    }
}

/// Render a duration as `MM:SS`, or `HH:MM:SS` from one hour up.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Validate session length
#[inline(always)]
fn validate_duration(minutes: &str) -> Result<u32, String> {
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| format!("`{minutes}` is not a valid number of minutes"))?;
    if (1..=MAX_DURATION_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(format!(
            "Duration must be between 1 and {MAX_DURATION_MINUTES} minutes"
        ))
    }
}
