//! TOML-based configuration for pre-aggregations.
//!
//! Supports a config file (mantis-preagg.toml) with environment variable
//! expansion for paths.
//!
//! Example configuration:
//! ```toml
//! [refresh]
//! default_every = "1h"
//! key_renewal_threshold = "10s"
//! wait_timeout = "10s"
//! background = true
//! background_interval = "30s"
//! concurrency = 4
//!
//! [refresh.retry]
//! initial_backoff = "1s"
//! max_backoff = "5m"
//! multiplier = 2.0
//!
//! [storage]
//! schema = "pre_aggregations"
//! default_location = "external"
//! state_path = "${HOME}/.mantis/preagg.db"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::model::LocationKind;

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*([A-Za-z]+)\s*$").unwrap());

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(?P<braced>[^}]*)\}|(?P<bare>[A-Za-z0-9_]+))").unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no settings file at {0}")]
    FileNotFound(PathBuf),

    #[error("cannot read settings: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("malformed settings: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),

    #[error("not a duration: {0:?}")]
    InvalidDuration(String),

    #[error("unknown storage location: {0}")]
    UnsupportedLocation(String),

    #[error("no home directory for the default state path")]
    NoStateDir,

    #[error("{0}")]
    InvalidConfig(String),
}

/// Pre-aggregation settings, one TOML table per concern.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Refresh and build coordination.
    pub refresh: RefreshSettings,

    /// Where pre-aggregations and their state live.
    pub storage: StorageSettings,
}

/// Refresh configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Refresh interval for pre-aggregations without a refresh key.
    pub default_every: String,

    /// How long a computed refresh key is trusted before probing again.
    pub key_renewal_threshold: String,

    /// How long a query waits for a build before using the raw source.
    pub wait_timeout: String,

    /// Run the background refresh scheduler.
    pub background: bool,

    /// Interval between background refresh passes.
    pub background_interval: String,

    /// Maximum concurrent background builds.
    pub concurrency: usize,

    /// Backoff for failed background refreshes.
    pub retry: RetrySettings,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            default_every: "1h".to_string(),
            key_renewal_threshold: "10s".to_string(),
            wait_timeout: "10s".to_string(),
            background: true,
            background_interval: "30s".to_string(),
            concurrency: 4,
            retry: RetrySettings::default(),
        }
    }
}

impl RefreshSettings {
    pub fn default_every(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.default_every)
    }

    pub fn key_renewal_threshold(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.key_renewal_threshold)
    }

    pub fn wait_timeout(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.wait_timeout)
    }

    pub fn background_interval(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.background_interval)
    }
}

/// Retry backoff settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_backoff: String,
    pub max_backoff: String,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff: "1s".to_string(),
            max_backoff: "5m".to_string(),
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.initial_backoff)
    }

    pub fn max_backoff(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.max_backoff)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Schema materialized tables are created in.
    pub schema: String,

    /// Location for pre-aggregations that don't declare one.
    pub default_location: String,

    /// SQLite file holding instance state (supports ${ENV_VAR} expansion).
    pub state_path: Option<String>,

    /// Persist instance state across restarts.
    pub persist_state: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            schema: "pre_aggregations".to_string(),
            default_location: "external".to_string(),
            state_path: None,
            persist_state: true,
        }
    }
}

impl StorageSettings {
    pub fn default_location(&self) -> Result<LocationKind, SettingsError> {
        LocationKind::from_str(&self.default_location)
            .ok_or_else(|| SettingsError::UnsupportedLocation(self.default_location.clone()))
    }

    /// Resolved state file path, or `None` when state is not persisted.
    ///
    /// Defaults to `~/.mantis/preagg.db`.
    pub fn state_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        if !self.persist_state {
            return Ok(None);
        }
        match &self.state_path {
            Some(path) => Ok(Some(PathBuf::from(expand_env_vars(path)?))),
            None => {
                let home = dirs::home_dir().ok_or(SettingsError::NoStateDir)?;
                Ok(Some(home.join(".mantis").join("preagg.db")))
            }
        }
    }
}

impl Settings {
    /// Read and validate a settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let settings: Settings = toml::from_str(&fs::read_to_string(path)?)?;
        settings.validate()?;
        Ok(settings)
    }

    /// First settings file found, falling back to defaults:
    /// `$MANTIS_PREAGG_CONFIG`, then `./mantis-preagg.toml`, then
    /// `mantis/preagg.toml` under the user config directory.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("MANTIS_PREAGG_CONFIG") {
            return Self::from_file(path);
        }
        let candidates = std::iter::once(PathBuf::from("mantis-preagg.toml"))
            .chain(dirs::config_dir().map(|dir| dir.join("mantis").join("preagg.toml")));
        for candidate in candidates {
            if candidate.is_file() {
                return Self::from_file(candidate);
            }
        }
        Ok(Settings::default())
    }

    /// Check every duration and enum-like string up front.
    pub fn validate(&self) -> Result<(), SettingsError> {
        non_zero("refresh.default_every", self.refresh.default_every()?)?;
        self.refresh.key_renewal_threshold()?;
        self.refresh.wait_timeout()?;
        non_zero("refresh.background_interval", self.refresh.background_interval()?)?;
        non_zero("refresh.retry.initial_backoff", self.refresh.retry.initial_backoff()?)?;
        self.refresh.retry.max_backoff()?;
        if self.refresh.retry.multiplier < 1.0 {
            return Err(SettingsError::InvalidConfig(
                "refresh.retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.refresh.concurrency == 0 {
            return Err(SettingsError::InvalidConfig(
                "refresh.concurrency must be positive".to_string(),
            ));
        }
        self.storage.default_location()?;
        Ok(())
    }
}

fn non_zero(field: &str, duration: Duration) -> Result<Duration, SettingsError> {
    if duration.is_zero() {
        return Err(SettingsError::InvalidConfig(format!("{} must be non-zero", field)));
    }
    Ok(duration)
}

/// Parse a duration such as `"30s"`, `"5m"`, `"1 hour"` or `"250ms"`.
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let invalid = || SettingsError::InvalidDuration(s.to_string());
    let caps = DURATION_PATTERN.captures(s).ok_or_else(invalid)?;
    let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
    let seconds = match caps[2].to_lowercase().as_str() {
        "ms" | "millisecond" | "milliseconds" => return Ok(Duration::from_millis(amount)),
        "s" | "sec" | "second" | "seconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(amount * seconds))
}

/// Substitute `${VAR}` and `$VAR` references from the environment.
///
/// A `$` not followed by a name is left alone.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.name("braced").or(caps.name("bare")))
        else {
            continue;
        };
        let value = env::var(name.as_str())
            .map_err(|_| SettingsError::MissingEnvVar(name.as_str().to_string()))?;
        out.push_str(&s[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(out)
}
