//! Runtime configuration for the workbook cache and watcher

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::excel::{ExcelError, ExcelResult};

/// Environment variable that overrides `data_dir`
pub const DATA_DIR_ENV: &str = "NOCLIST_DATA_DIR";

/// Default quiet period before buffered watch events are flushed
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;
/// Default attempt budget for reads that hit a locked file
pub const DEFAULT_READ_RETRY_ATTEMPTS: u32 = 3;
/// Default backoff between locked-file read attempts
pub const DEFAULT_READ_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelConfig {
    /// Directory holding groups.xlsx and contacts.xlsx
    pub data_dir: PathBuf,
    /// Extra directories searched after `data_dir`, in order
    pub search_dirs: Vec<PathBuf>,
    pub debounce_ms: u64,
    pub read_retry_attempts: u32,
    pub read_retry_delay_ms: u64,
    /// Where workbooks are staged before being handed to an external viewer
    pub cache_dir: PathBuf,
}

impl Default for ExcelConfig {
    fn default() -> Self {
        ExcelConfig {
            data_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            search_dirs: Vec::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            read_retry_attempts: DEFAULT_READ_RETRY_ATTEMPTS,
            read_retry_delay_ms: DEFAULT_READ_RETRY_DELAY_MS,
            cache_dir: default_cache_dir(),
        }
    }
}

impl ExcelConfig {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        ExcelConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from an optional TOML file, then apply the
    /// environment override. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> ExcelResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            Some(path) => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                ExcelConfig::default()
            }
            None => ExcelConfig::default(),
        };

        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Parse a TOML config file
    pub fn load_from_file(path: &Path) -> ExcelResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExcelError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| ExcelError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_policy(&self) -> crate::excel::RetryPolicy {
        crate::excel::RetryPolicy {
            attempts: self.read_retry_attempts.max(1),
            delay: Duration::from_millis(self.read_retry_delay_ms),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("noclist")
        .join("excel-cache")
}
