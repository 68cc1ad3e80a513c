use std::path::PathBuf;

use serde::Deserialize;

use crate::paths::{tally_config_path, tally_home_dir, user_home_dir};

/// Optional `~/.tally/config.toml`. Everything has a default; env vars
/// parsed in the gateway override whatever is set here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub version: u32,
    pub server: ServerSection,
    pub auth: AuthSection,
    pub paths: PathsSection,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
            auth: AuthSection::default(),
            paths: PathsSection::default(),
        }
    }
}

impl TallyConfig {
    pub fn load() -> Result<Self, String> {
        let path = tally_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        toml::from_str(&raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn config_path() -> Result<PathBuf, String> {
        tally_config_path()
    }

    pub fn db_path(&self) -> Result<PathBuf, String> {
        match self.paths.db_path.as_ref() {
            Some(path) => resolve_path(path),
            None => Ok(tally_home_dir()?.join("tally.sqlite3")),
        }
    }

    pub fn vault_path(&self) -> Result<PathBuf, String> {
        match self.paths.vault_path.as_ref() {
            Some(path) => resolve_path(path),
            None => Ok(tally_home_dir()?.join("secrets.vault")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub heartbeat_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: None,
            heartbeat_secs: None,
            idle_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub otp_timeout_secs: Option<u64>,
    pub manual_confirm_timeout_secs: Option<u64>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            otp_timeout_secs: None,
            manual_confirm_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub db_path: Option<String>,
    pub vault_path: Option<String>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            db_path: None,
            vault_path: None,
        }
    }
}

fn resolve_path(value: &str) -> Result<PathBuf, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("path override is empty".to_string());
    }
    let home = user_home_dir();
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = home {
            return Ok(home.join(rest));
        }
    }
    if trimmed == "~" {
        if let Some(home) = home {
            return Ok(home);
        }
    }
    let path = PathBuf::from(trimmed);
    if path.is_relative() {
        let base = tally_home_dir()?;
        return Ok(base.join(path));
    }
    Ok(path)
}
