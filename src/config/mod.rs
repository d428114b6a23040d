//! Configuration module for pre-aggregations.
//!
//! Handles refresh, retry and storage settings.

mod settings;

pub use settings::{
    expand_env_vars, parse_duration, RefreshSettings, RetrySettings, Settings, SettingsError,
    StorageSettings,
};
