use std::fs;
use std::path::{Path, PathBuf};

use runinfo_core::DEFAULT_STORE_FILE_NAME;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RUNINFO_DIR_NAME: &str = ".runinfo";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__", ".venv"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RuninfoConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_file_name")]
    pub file_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: default_store_file_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ignored_dirs: default_ignored_dirs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn runinfo_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(RUNINFO_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    runinfo_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<RuninfoConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(RuninfoConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: RuninfoConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn write_default_config(workspace_root: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(runinfo_dir(workspace_root))?;

    let path = config_path(workspace_root);
    let content = toml::to_string_pretty(&RuninfoConfig::default())?;
    fs::write(&path, content)?;
    Ok(path)
}

fn default_store_file_name() -> String {
    DEFAULT_STORE_FILE_NAME.to_owned()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_ignored_dirs() -> Vec<String> {
    DEFAULT_IGNORED_DIRS
        .iter()
        .map(|dir| (*dir).to_owned())
        .collect()
}

fn normalize_config(mut config: RuninfoConfig) -> RuninfoConfig {
    let file_name = config.store.file_name.trim();
    if file_name.is_empty() {
        config.store.file_name = default_store_file_name();
    } else {
        config.store.file_name = file_name.to_owned();
    }

    if config.watch.poll_interval_ms == 0 {
        config.watch.poll_interval_ms = default_poll_interval_ms();
    }

    config.watch.ignored_dirs = config
        .watch
        .ignored_dirs
        .into_iter()
        .map(|dir| dir.trim().to_owned())
        .filter(|dir| !dir.is_empty())
        .collect();

    config
}
