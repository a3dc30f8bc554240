use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub zoom: ZoomConfig,
    pub selection: SelectionConfig,
    pub generation: GenerationConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoomConfig {
    pub min_percent: u32,
    pub max_percent: u32,
    pub step_percent: u32,
    pub initial_percent: u32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min_percent: 50,
            max_percent: 300,
            step_percent: 10,
            initial_percent: 100,
        }
    }
}

/// Boxes smaller than this at release are treated as accidental clicks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub min_width: f32,
    pub min_height: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_width: 10.0,
            min_height: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub text_model: String,
    pub image_model: String,
    pub api_key_env: String,
    /// No timeout when unset; a hung request then stays pending.
    pub request_timeout_secs: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            text_model: "gemini-3-pro-preview".to_owned(),
            image_model: "gemini-3-pro-image-preview".to_owned(),
            api_key_env: "GEMINI_API_KEY".to_owned(),
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub directory: Option<PathBuf>,
}

impl AppConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zoom = &self.zoom;
        if zoom.min_percent == 0 || zoom.min_percent > zoom.max_percent {
            return Err(ConfigError::Invalid(format!(
                "zoom range {}..={} is empty",
                zoom.min_percent, zoom.max_percent
            )));
        }
        if zoom.step_percent == 0 {
            return Err(ConfigError::Invalid("zoom step must be positive".into()));
        }
        if !(zoom.min_percent..=zoom.max_percent).contains(&zoom.initial_percent) {
            return Err(ConfigError::Invalid(format!(
                "initial zoom {}% is outside {}..={}",
                zoom.initial_percent, zoom.min_percent, zoom.max_percent
            )));
        }
        let sel = &self.selection;
        if !(sel.min_width.is_finite() && sel.min_height.is_finite())
            || sel.min_width < 0.0
            || sel.min_height < 0.0
        {
            return Err(ConfigError::Invalid(
                "selection minimum size must be a non-negative number".into(),
            ));
        }
        if self.generation.text_model.trim().is_empty()
            || self.generation.image_model.trim().is_empty()
        {
            return Err(ConfigError::Invalid("model names must not be empty".into()));
        }
        Ok(())
    }
}
