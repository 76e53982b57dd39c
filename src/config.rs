use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::SyncConfig;
use crate::domain::account::{DEFAULT_MAX_DOWNLOAD_SIZE, DEFAULT_VISIBLE_LIMIT};

const APP_DIR: &str = "rs_mail_backend";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where per-account databases live; defaults to the config dir.
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_visible_limit")]
    pub default_visible_limit: u32,
    #[serde(default = "default_max_download_size")]
    pub max_download_size: u64,
    #[serde(default = "default_true")]
    pub sync_remote_deletions: bool,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_visible_limit() -> u32 {
    DEFAULT_VISIBLE_LIMIT
}

fn default_max_download_size() -> u64 {
    DEFAULT_MAX_DOWNLOAD_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_interval_secs: default_sync_interval(),
            default_visible_limit: default_visible_limit(),
            max_download_size: default_max_download_size(),
            sync_remote_deletions: true,
        }
    }
}

impl Config {
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            sync_remote_deletions: self.sync_remote_deletions,
            maximum_auto_download_message_size: self.max_download_size,
            default_visible_limit: self.default_visible_limit,
            ..SyncConfig::default()
        }
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join("data")),
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn accounts_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("accounts.toml");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Reads `path`; a missing file is created holding the defaults.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let template = toml::to_string_pretty(&Config::default())?;
        fs::write(path, template)?;
        log::info!("created config template at {}", path.display());
        return Ok(Config::default());
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_gets_template() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");

        let cfg = load_config_from(&path)?;
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
        assert_eq!(load_config_from(&path)?, cfg);
        Ok(())
    }

    #[test]
    fn partial_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "sync_interval_secs = 60\nsync_remote_deletions = false\n")?;

        let cfg = load_config_from(&path)?;
        assert_eq!(cfg.sync_interval_secs, 60);
        assert_eq!(cfg.default_visible_limit, 25);

        let sync = cfg.to_sync_config();
        assert!(!sync.sync_remote_deletions);
        assert_eq!(sync.maximum_auto_download_message_size, 128 * 1024);
        Ok(())
    }
}
