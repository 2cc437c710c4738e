//! Configuration loading and layered setting resolution
//!
//! Settings resolve in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging section shared by every service's TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve a single string setting across the four tiers
pub fn resolve_setting(
    cli_arg: Option<&str>,
    env_value: Option<String>,
    toml_value: Option<&str>,
    default: &str,
) -> String {
    if let Some(value) = cli_arg {
        return value.to_string();
    }
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return value;
    }
    if let Some(value) = toml_value {
        return value.to_string();
    }
    default.to_string()
}

/// Interpret an environment flag such as `TEST_RUN=True`
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Load a TOML bootstrap file
///
/// An explicit path must exist and parse. Without one, the platform default
/// location is tried; when nothing is found the compiled defaults are used.
pub fn load_toml_config<T>(explicit: Option<&Path>, module_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        return read_toml(path);
    }

    match default_config_path(module_name) {
        Some(path) if path.exists() => read_toml(&path),
        _ => {
            warn!(
                "No config file found for {}, using compiled defaults",
                module_name
            );
            Ok(T::default())
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Platform config file location: `~/.config/sdc/<module>.toml`, then `/etc/sdc/<module>.toml` on Linux
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", module_name);
    let user_config = dirs::config_dir().map(|d| d.join("sdc").join(&file_name));

    if cfg!(target_os = "linux") {
        if let Some(path) = user_config.as_ref().filter(|p| p.exists()) {
            return Some(path.clone());
        }
        let system_config = PathBuf::from("/etc/sdc").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }
    user_config
}

/// OS-dependent default data folder (metrics database, artifact cache)
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("sdc"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/sdc"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("sdc"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/sdc"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("sdc"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\sdc"))
    } else {
        PathBuf::from("./sdc_data")
    }
}
