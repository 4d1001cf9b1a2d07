//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::codec::Geometry;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Static assets served at `/`
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Where captures are written, served at `/captures`
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,
}

/// Tethered camera configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CameraConfig {
    /// Camera model to open; empty picks the first camera detected
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_iso_group")]
    pub iso_group: String,

    #[serde(default = "default_iso_key")]
    pub iso_key: String,

    /// ISO value that lets the camera choose sensitivity
    #[serde(default = "default_auto_value")]
    pub auto_value: String,

    /// Keep the camera's copy of each capture on its card
    #[serde(default = "default_leave_on_camera")]
    pub leave_on_camera: bool,

    /// Extension for persisted raw files
    #[serde(default = "default_raw_extension")]
    pub raw_extension: String,
}

/// Streaming endpoint timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamConfig {
    #[serde(default = "default_preview_interval_ms")]
    pub preview_interval_ms: u64,

    #[serde(default = "default_auto_capture_interval_secs")]
    pub auto_capture_interval_secs: u64,
}

/// Output image settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Corrections applied to everything sent to clients
    #[serde(default)]
    pub transform: Geometry,
}

// Default value functions
fn default_bind_ip() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_public_dir() -> PathBuf { PathBuf::from("public") }
fn default_captures_dir() -> PathBuf { PathBuf::from("captures") }
fn default_iso_group() -> String { "imgsettings".to_string() }
fn default_iso_key() -> String { "iso".to_string() }
fn default_auto_value() -> String { "Auto".to_string() }
fn default_leave_on_camera() -> bool { true }
fn default_raw_extension() -> String { "cr2".to_string() }
fn default_preview_interval_ms() -> u64 { 30 }
fn default_auto_capture_interval_secs() -> u64 { 10 }
fn default_jpeg_quality() -> u8 { 90 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            public_dir: default_public_dir(),
            captures_dir: default_captures_dir(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            iso_group: default_iso_group(),
            iso_key: default_iso_key(),
            auto_value: default_auto_value(),
            leave_on_camera: default_leave_on_camera(),
            raw_extension: default_raw_extension(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            preview_interval_ms: default_preview_interval_ms(),
            auto_capture_interval_secs: default_auto_capture_interval_secs(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            transform: Geometry::default(),
        }
    }
}

impl StreamConfig {
    pub fn preview_interval(&self) -> Duration {
        Duration::from_millis(self.preview_interval_ms)
    }

    pub fn auto_capture_interval(&self) -> Duration {
        Duration::from_secs(self.auto_capture_interval_secs)
    }
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_ip, self.server.port)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.jpeg_quality == 0 || self.image.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg-quality must be between 1 and 100, got {}",
                self.image.jpeg_quality
            )));
        }

        if self.stream.preview_interval_ms == 0 {
            return Err(ConfigError::Invalid("preview-interval-ms must be > 0".into()));
        }

        if self.stream.auto_capture_interval_secs == 0 {
            return Err(ConfigError::Invalid("auto-capture-interval-secs must be > 0".into()));
        }

        if self.camera.iso_key.is_empty() {
            return Err(ConfigError::Invalid("iso-key must not be empty".into()));
        }

        if self.camera.auto_value.is_empty() {
            return Err(ConfigError::Invalid("auto-value must not be empty".into()));
        }

        let ext = &self.camera.raw_extension;
        if ext.is_empty() || ext.contains(['.', '/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "raw-extension must be a bare extension like \"cr2\", got {:?}",
                ext
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Transform;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.camera.iso_key, "iso");
        assert_eq!(config.stream.preview_interval(), Duration::from_millis(30));
        assert_eq!(config.stream.auto_capture_interval(), Duration::from_secs(10));
        assert_eq!(config.image.transform, Geometry::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.server.captures_dir, PathBuf::from("captures"));
        assert!(config.camera.leave_on_camera);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
[server]
bind-ip = "127.0.0.1"
port = 9000
captures-dir = "/srv/captures"

[camera]
name = "Canon EOS 600D"
auto-value = "auto"
leave-on-camera = false

[stream]
preview-interval-ms = 50

[image]
jpeg-quality = 75
transform = ["rotate180"]
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.server.public_dir, PathBuf::from("public"));
        assert_eq!(config.server.captures_dir, PathBuf::from("/srv/captures"));
        assert_eq!(config.camera.name, "Canon EOS 600D");
        assert_eq!(config.camera.auto_value, "auto");
        assert!(!config.camera.leave_on_camera);
        assert_eq!(config.stream.preview_interval_ms, 50);
        assert_eq!(config.stream.auto_capture_interval_secs, 10);
        assert_eq!(config.image.jpeg_quality, 75);
        assert_eq!(config.image.transform, Geometry(vec![Transform::Rotate180]));
    }

    #[test]
    fn test_invalid_quality() {
        let result = Config::from_str("[image]\njpeg-quality = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_raw_extension() {
        let result = Config::from_str("[camera]\nraw-extension = \".cr2\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let result = Config::from_str("[image]\ntransform = [\"skew\"]\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
