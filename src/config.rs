use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for Artfolio
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where versions and rendered videos live
    pub media: MediaConfig,

    /// External encoder settings
    pub encoder: EncoderConfig,

    /// Render request defaults
    pub render: RenderConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.render.validate()?;
        Ok(())
    }
}

/// Media root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory holding `<group>/<item>/<file>` trees
    pub root: PathBuf,

    /// URL prefix under which the media root is served
    pub public_prefix: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            public_prefix: "/media".to_string(),
        }
    }
}

/// External encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable, looked up on PATH when not absolute
    pub program: String,

    /// Video codec for both passes
    pub codec: String,

    /// Output pixel format
    pub pixel_format: String,

    /// Codec preset
    pub preset: String,

    /// Constant rate factor (0-51, lower is better)
    pub crf: u8,

    /// Output width; every input is scaled to it (up or down) and the
    /// height follows the aspect ratio
    pub max_width: u32,

    /// Kill the encoder after this many seconds. Unset means wait forever.
    pub timeout_secs: Option<u64>,

    /// Motion interpolation mode for the minterpolate filter
    pub mi_mode: String,

    /// Motion compensation mode for the minterpolate filter
    pub mc_mode: String,

    /// Variable-size block motion compensation
    pub vsbmc: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            preset: "medium".to_string(),
            crf: 20,
            max_width: 1280,
            timeout_secs: None,
            mi_mode: "mci".to_string(),
            mc_mode: "aobmc".to_string(),
            vsbmc: true,
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "encoder.program".to_string(),
                value: self.program.clone()
            }.into());
        }

        if self.crf > 51 {
            return Err(ConfigError::InvalidValue {
                key: "encoder.crf".to_string(),
                value: self.crf.to_string()
            }.into());
        }

        // yuv420p needs even dimensions
        if self.max_width == 0 || self.max_width % 2 != 0 {
            return Err(ConfigError::InvalidValue {
                key: "encoder.max_width".to_string(),
                value: self.max_width.to_string()
            }.into());
        }

        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "encoder.timeout_secs".to_string(),
                value: "0".to_string()
            }.into());
        }

        Ok(())
    }
}

/// Defaults applied to render requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Seconds each version stays on screen
    pub duration: u32,

    /// Base frame rate before interpolation
    pub fps: u32,

    /// Interpolation factor (1 disables the pass)
    pub interpolate: u32,

    /// Allow at most one render per item at a time within this process
    pub exclusive_per_item: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            duration: 2,
            fps: 25,
            interpolate: 1,
            exclusive_per_item: true,
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("render.duration", self.duration),
            ("render.fps", self.fps),
            ("render.interpolate", self.interpolate),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string()
                }.into());
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.duration, 2);
        assert_eq!(config.render.fps, 25);
        assert_eq!(config.media.public_prefix, "/media");
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("artfolio.toml");

        let mut original_config = Config::default();
        original_config.encoder.timeout_secs = Some(600);
        original_config.render.fps = 30;

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded_config.encoder.timeout_secs, Some(600));
        assert_eq!(loaded_config.render.fps, 30);
        assert_eq!(loaded_config.encoder.codec, "libx264");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[media]\nroot = \"/srv/art\"\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.media.root, PathBuf::from("/srv/art"));
        assert_eq!(config.media.public_prefix, "/media");
        assert_eq!(config.encoder.max_width, 1280);
    }

    #[test]
    fn test_odd_width_rejected() {
        let mut config = Config::default();
        config.encoder.max_width = 1279;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_render_defaults_rejected() {
        let mut config = Config::default();
        config.render.fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/definitely/not/here.toml");
        assert!(result.is_err());
    }
}
