//! Application configuration and the persisted last-used sensor.

use crate::sensors::csc::DEFAULT_WHEEL_CIRCUMFERENCE_MM;
use crate::sensors::types::{SensorIdentity, SessionConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Sensor settings
    #[serde(default)]
    pub sensor: SensorSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            sensor: SensorSettings::default(),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Wheel circumference in millimeters
    pub wheel_circumference_mm: u32,
    /// Identifier of the last connected sensor
    pub last_sensor_id: Option<String>,
    /// When the last sensor was selected
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Reconnect to the last sensor when Bluetooth turns on
    pub reconnect_on_power_on: bool,
    /// Scan duration for the `scan` command in seconds
    pub scan_timeout_secs: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            wheel_circumference_mm: DEFAULT_WHEEL_CIRCUMFERENCE_MM,
            last_sensor_id: None,
            last_connected_at: None,
            reconnect_on_power_on: true,
            scan_timeout_secs: 30,
        }
    }
}

impl SensorSettings {
    /// Validate wheel circumference (500-3500 mm).
    pub fn validate_wheel_circumference(mm: u32) -> bool {
        (500..=3500).contains(&mm)
    }

    /// Update the wheel circumference.
    pub fn set_wheel_circumference(&mut self, mm: u32) -> Result<(), ConfigError> {
        if !Self::validate_wheel_circumference(mm) {
            return Err(ConfigError::InvalidValue(format!(
                "wheel circumference must be between 500 and 3500 mm, got {}",
                mm
            )));
        }
        self.wheel_circumference_mm = mm;
        Ok(())
    }

    /// Remember `identity` as the sensor to reconnect to.
    pub fn remember_sensor(&mut self, identity: &SensorIdentity) {
        self.last_sensor_id = Some(identity.device_id.clone());
        self.last_connected_at = Some(Utc::now());
    }

    /// Session configuration derived from these settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::with_wheel(self.wheel_circumference_mm)
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "bikespeed", "BikeSpeed")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load application configuration from `path`, using defaults if it is missing.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(get_data_dir);

    if !path.exists() {
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if !SensorSettings::validate_wheel_circumference(config.sensor.wheel_circumference_mm) {
        tracing::warn!(
            "Ignoring invalid wheel circumference {} mm in {}",
            config.sensor.wheel_circumference_mm,
            path.display()
        );
        config.sensor.wheel_circumference_mm = DEFAULT_WHEEL_CIRCUMFERENCE_MM;
    }
    config.data_dir = data_dir;

    Ok(config)
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save application configuration to `path`.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
