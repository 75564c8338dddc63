//! Configuration loading and parsing for the key-dispatch runtime.
//!
//! Parses a TOML config file (discovered via a current-directory override
//! falling back to the platform config dir) into an `[input]` table
//! (timeout/timeoutlen, mirroring vim's `timeout`/`timeoutlen` options),
//! a `[modes]` table (per-mode count/register/input-consuming flags), and
//! a `[suggest]` table (the Suggestion Engine's display delay and fold
//! threshold). Unknown fields are ignored so the file format can evolve
//! without breaking older configs, and a missing or malformed file falls
//! back to `Config::default()` rather than failing startup.

use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "InputConfig::default_timeout")]
    pub timeout: bool,
    #[serde(default = "InputConfig::default_timeoutlen")]
    pub timeoutlen: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            timeout: Self::default_timeout(),
            timeoutlen: Self::default_timeoutlen(),
        }
    }
}

impl InputConfig {
    const fn default_timeout() -> bool {
        true
    }

    const fn default_timeoutlen() -> u32 {
        1000
    }
}

/// A single mode's dispatch-relevant flags, as configured rather than
/// compiled in (SPEC_FULL §3/§1.1: "mode flags... are configuration, not
/// compile-time constants").
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeConfig {
    #[serde(default)]
    pub uses_count: bool,
    #[serde(default)]
    pub uses_registers: bool,
    #[serde(default)]
    pub uses_input: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SuggestConfig {
    #[serde(default = "SuggestConfig::default_delay_ms")]
    pub delay_ms: u32,
    #[serde(default = "SuggestConfig::default_fold_threshold")]
    pub fold_threshold: usize,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            delay_ms: Self::default_delay_ms(),
            fold_threshold: Self::default_fold_threshold(),
        }
    }
}

impl SuggestConfig {
    const fn default_delay_ms() -> u32 {
        500
    }

    const fn default_fold_threshold() -> usize {
        10
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub suggest: SuggestConfig,
    /// Keyed by mode name (e.g. `"normal"`, `"insert"`, `"cmdline"`); a mode
    /// absent from the table gets `ModeConfig::default()` (no count, no
    /// registers, no raw-input passthrough).
    #[serde(default)]
    pub modes: BTreeMap<String, ModeConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>,
    pub file: ConfigFile,
}

impl Config {
    pub fn mode(&self, name: &str) -> ModeConfig {
        self.file.modes.get(name).copied().unwrap_or_default()
    }
}

/// Best-effort config path following platform conventions (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("vifm-core.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("vifm-core").join("vifm-core.toml");
    }
    PathBuf::from("vifm-core.toml")
}

/// Parse `content` as a config file, without the missing-file/parse-error
/// fallback `load_from` applies. Exposed so callers (and tests) can observe
/// a genuine parse failure instead of a silently degraded default.
pub fn load_str(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_file_missing_using_defaults");
            return Ok(Config::default());
        }
    };
    match load_str(&content) {
        Ok(file) => Ok(Config {
            raw: Some(content),
            file,
        }),
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed_using_defaults");
            Ok(Config::default())
        }
    }
}
