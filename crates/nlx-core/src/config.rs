use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

pub const RUN_PRESETS_SCHEMA_VERSION: u32 = 1;
pub const RUN_PRESETS_STORAGE_KEY: &str = "nlx.runPresets";
pub const GO_PREFIX_TIMEOUT_MS: i64 = 800;
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";
pub const DEFAULT_TOKEN_MIN_LENGTH: usize = 32;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 200_000;
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub redaction: RedactionConfig,
    pub shortcuts: ShortcutConfig,
    pub output: OutputLimits,
    pub presets: PresetsConfig,
}

impl EngineConfig {
    /// Parses a TOML document; absent sections keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads the config file at `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RedactionConfig {
    pub placeholder: String,
    pub token_min_length: usize,
    pub extra_patterns: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            placeholder: REDACTION_PLACEHOLDER.to_string(),
            token_min_length: DEFAULT_TOKEN_MIN_LENGTH,
            extra_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ShortcutConfig {
    pub go_prefix_timeout_ms: i64,
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            go_prefix_timeout_ms: GO_PREFIX_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct OutputLimits {
    pub max_chars: usize,
    pub max_lines: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_lines: DEFAULT_MAX_OUTPUT_LINES,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PresetsConfig {
    pub storage_key: String,
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            storage_key: RUN_PRESETS_STORAGE_KEY.to_string(),
        }
    }
}
