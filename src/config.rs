use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::models::sync::Identity;

/// Settings loaded from `config.toml`. Every section is optional: without
/// `[backend]` and `[auth]` the roster works purely offline.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub backend: Option<BackendSettings>,
    pub auth: Option<AuthSettings>,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Supabase project the queue drains into
#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    /// Project URL, e.g. "https://xyz.supabase.co"
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub user_id: String,
    pub access_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Seconds between passes in `watch` mode
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    pub database_path: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            database_path: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_interval_secs() -> u64 {
    30
}

/// Resolve a `${VAR}` value from the environment; anything else is returned as-is
fn expand_env(value: &str, field: &str) -> anyhow::Result<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var = &value[2..value.len() - 1];
        return env::var(var)
            .with_context(|| format!("missing environment var {} for {}", var, field));
    }
    Ok(value.to_string())
}

impl Settings {
    /// Load and parse the configuration from the given TOML file path
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&data)
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Like [`Settings::from_file`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            log::debug!("[config] {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let mut settings: Settings = toml::from_str(data).context("invalid TOML")?;

        if let Some(ref mut backend) = settings.backend {
            backend.anon_key = expand_env(&backend.anon_key, "anon_key")?;
        }
        if let Some(ref mut auth) = settings.auth {
            auth.access_token = expand_env(&auth.access_token, "access_token")?;
        }
        Ok(settings)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.auth.as_ref().map(|auth| Identity {
            user_id: auth.user_id.clone(),
            access_token: auth.access_token.clone(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.sync
            .database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `<data dir>/roster/roster.db`, or `./roster.db` when no data dir is known
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("roster").join("roster.db"))
        .unwrap_or_else(|| PathBuf::from("roster.db"))
}

/// `<config dir>/roster/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("roster").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}
