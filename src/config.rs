#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DB_DSN: &str = "tubetrack.db";

pub const API_KEY_VAR: &str = "YOUTUBE_API_KEY";
pub const DB_USER_VAR: &str = "DB_USER";
pub const DB_PASSWORD_VAR: &str = "DB_PASSWORD";
pub const DB_DSN_VAR: &str = "DB_DSN";

/// Everything the tracker needs from its environment, loaded once at startup.
#[derive(Clone)]
pub struct TrackerConfig {
    pub api_key: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_dsn: PathBuf,
}

impl TrackerConfig {
    /// Commands that talk to the YouTube Data API call this before fetching.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{API_KEY_VAR} not set (use --api-key or the env file)"))
    }

    /// The embedded store authenticates nobody; credentials are only kept so a
    /// misconfigured deployment is visible in the logs.
    pub fn has_db_credentials(&self) -> bool {
        self.db_user.is_some() || self.db_password.is_some()
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "<redacted>" } else { "<unset>" }
        }
        f.debug_struct("TrackerConfig")
            .field("api_key", &redact(&self.api_key))
            .field("db_user", &self.db_user)
            .field("db_password", &redact(&self.db_password))
            .field("db_dsn", &self.db_dsn)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub db_dsn: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<TrackerConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<TrackerConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<TrackerConfig> {
    let api_key = overrides
        .api_key
        .and_then(non_blank)
        .or_else(|| lookup_value(API_KEY_VAR, file_vars, &env_lookup));
    let db_user = lookup_value(DB_USER_VAR, file_vars, &env_lookup);
    let db_password = lookup_value(DB_PASSWORD_VAR, file_vars, &env_lookup);
    let db_dsn = overrides
        .db_dsn
        .map(|path| path.to_string_lossy().into_owned())
        .and_then(non_blank)
        .or_else(|| lookup_value(DB_DSN_VAR, file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_DB_DSN.to_string());
    Ok(TrackerConfig {
        api_key,
        db_user,
        db_password,
        db_dsn: PathBuf::from(db_dsn),
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
