//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::RociError;

/// Global default config (lazy-initialized from file and env).
static DEFAULT_CONFIG: OnceLock<RociStreamConfig> = OnceLock::new();

/// Default cap on steps per run, applied on top of stop conditions.
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RociStreamConfig {
    /// Hard cap on steps per run. `None` disables the cap.
    pub max_steps: Option<usize>,
    /// Forward provider raw parts onto the full stream.
    pub include_raw_chunks: bool,
    /// Emit per-part debug tracing.
    pub debug: bool,
}

impl Default for RociStreamConfig {
    fn default() -> Self {
        Self {
            max_steps: Some(DEFAULT_MAX_STEPS),
            include_raw_chunks: false,
            debug: false,
        }
    }
}

impl RociStreamConfig {
    /// Get (or create) the global default config.
    pub fn global() -> &'static RociStreamConfig {
        DEFAULT_CONFIG.get_or_init(Self::load)
    }

    /// Load the default config file (if any) and apply environment overrides.
    pub fn load() -> Self {
        let base = Self::default_path()
            .filter(|path| path.exists())
            .and_then(|path| match Self::from_file(&path) {
                Ok(config) => Some(config),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "ignoring unreadable config file"
                    );
                    None
                }
            })
            .unwrap_or_default();
        base.with_env_overrides()
    }

    /// Load from environment variables only.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `ROCI_STREAM_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        if let Ok(raw) = std::env::var("ROCI_STREAM_MAX_STEPS") {
            match raw.trim() {
                "" | "none" | "0" => self.max_steps = None,
                value => match value.parse() {
                    Ok(max) => self.max_steps = Some(max),
                    Err(_) => {
                        tracing::warn!(value, "ignoring invalid ROCI_STREAM_MAX_STEPS");
                    }
                },
            }
        }
        if let Some(flag) = env_flag("ROCI_STREAM_INCLUDE_RAW") {
            self.include_raw_chunks = flag;
        }
        if let Some(flag) = env_flag("ROCI_STREAM_DEBUG") {
            self.debug = flag;
        }
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, RociError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, RociError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Platform config location, e.g. `~/.config/roci/stream.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "roci")
            .map(|dirs| dirs.config_dir().join("stream.toml"))
    }

    pub fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_raw_chunks(mut self, include: bool) -> Self {
        self.include_raw_chunks = include;
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
