//! Toolbox configuration.

use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var pointing at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "EMU_TOOLBOX_CONFIG";
/// Env var overriding `completion_timeout_ms`.
pub const TIMEOUT_ENV: &str = "EMU_TOOLBOX_TIMEOUT_MS";

/// Configuration for the toolbox.
/// Priority: environment variables > config file > defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolboxConfig {
    /// How long the completion stage may wait for status and message bytes.
    pub completion_timeout_ms: u64,
    /// 4 KiB blocks per batched read, when the device supports them.
    pub download_batch_blocks: u32,
    /// 512-byte blocks per batched send, when the device supports them.
    pub upload_batch_blocks: u32,
    /// How many times to check for media removal after an eject.
    pub eject_poll_attempts: u32,
    pub eject_poll_interval_ms: u64,
    /// Identification strings accepted at the start of the vendor page.
    pub device_signatures: Vec<String>,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: 5000,
            download_batch_blocks: 8,
            upload_batch_blocks: 32,
            eject_poll_attempts: 20,
            eject_poll_interval_ms: 250,
            device_signatures: vec!["BlueSCSI is the BEST".to_string(), "ZuluSCSI is the BEST".to_string()],
        }
    }
}

impl ToolboxConfig {
    /// Loads configuration with priority: env vars > config file > defaults.
    pub fn load() -> Self {
        let from_file = config_path().and_then(|path| read_config_file(&path));
        Self::from_file_and_env(from_file, env::var(TIMEOUT_ENV).ok().as_deref())
    }

    /// Merges an optional file config with an optional timeout override and clamps the result.
    pub fn from_file_and_env(from_file: Option<ToolboxConfig>, env_timeout: Option<&str>) -> Self {
        let mut config = from_file.unwrap_or_default();
        if let Some(raw) = env_timeout {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.completion_timeout_ms = ms,
                Err(_) => warn!("config: ignoring {}={:?}, not a number of milliseconds", TIMEOUT_ENV, raw),
            }
        }
        config.clamped()
    }

    /// Batch sizes go into a single CDB byte, so they're kept to 1–255.
    fn clamped(mut self) -> Self {
        self.download_batch_blocks = self.download_batch_blocks.clamp(1, 255);
        self.upload_batch_blocks = self.upload_batch_blocks.clamp(1, 255);
        self
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn eject_poll_interval(&self) -> Duration {
        Duration::from_millis(self.eject_poll_interval_ms)
    }

    pub fn download_batch(&self) -> u8 {
        self.download_batch_blocks.clamp(1, 255) as u8
    }

    pub fn upload_batch(&self) -> u8 {
        self.upload_batch_blocks.clamp(1, 255) as u8
    }
}

/// Where the config file lives: `EMU_TOOLBOX_CONFIG`, else `<config dir>/emu-toolbox/config.json`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("emu-toolbox").join("config.json"))
}

/// Reads and parses a config file. A missing file is silent; an unreadable or invalid one is
/// logged and ignored.
pub fn read_config_file(path: &Path) -> Option<ToolboxConfig> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("config: couldn't read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("config: {} is not valid, using defaults: {}", path.display(), e);
            None
        }
    }
}
