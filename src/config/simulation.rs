use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::world::RegionGrid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: f32,
    /// 0 picks a random seed on first start; the chosen seed is persisted.
    #[serde(default)]
    pub world_seed: u64,
    #[serde(default = "default_map_size")]
    pub map_size_x: u32,
    #[serde(default = "default_map_size")]
    pub map_size_z: u32,
    #[serde(default = "default_region_size")]
    pub region_size: u32,
    #[serde(default = "default_sea_level")]
    pub sea_level: f64,
    #[serde(default = "default_day_length")]
    pub day_length_secs: f32,
    #[serde(default = "default_transition_secs")]
    pub transition_secs: f32,
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: f32,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: f32,
    #[serde(default = "default_save_directory")]
    pub save_directory: String,
    #[serde(default = "default_patterns_file")]
    pub patterns_file: String,
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    #[serde(default = "default_websocket_bind")]
    pub websocket_bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Client side: how long a blended snapshot stays valid.
    #[serde(default = "default_snapshot_cache_ms")]
    pub snapshot_cache_ms: u64,
    /// Shared secret admin commands must carry. Unset rejects every command.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_tick_rate() -> f32 {
    4.0
}
fn default_map_size() -> u32 {
    4096
}
fn default_region_size() -> u32 {
    512
}
fn default_sea_level() -> f64 {
    110.0
}
fn default_day_length() -> f32 {
    2880.0
}
fn default_transition_secs() -> f32 {
    120.0
}
fn default_resync_interval() -> f32 {
    30.0
}
fn default_flush_interval() -> f32 {
    60.0
}
fn default_save_directory() -> String {
    "./weather-data".to_string()
}
fn default_patterns_file() -> String {
    "./weather-patterns.toml".to_string()
}
fn default_websocket_port() -> u16 {
    8119
}
fn default_websocket_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_snapshot_cache_ms() -> u64 {
    60
}

/// NaN and infinities fail too.
fn positive_finite(value: f32) -> bool {
    value > 0.0 && value.is_finite()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            tick_rate_hz: default_tick_rate(),
            world_seed: 0,
            map_size_x: default_map_size(),
            map_size_z: default_map_size(),
            region_size: default_region_size(),
            sea_level: default_sea_level(),
            day_length_secs: default_day_length(),
            transition_secs: default_transition_secs(),
            resync_interval_secs: default_resync_interval(),
            flush_interval_secs: default_flush_interval(),
            save_directory: default_save_directory(),
            patterns_file: default_patterns_file(),
            websocket_port: default_websocket_port(),
            websocket_bind: default_websocket_bind(),
            log_level: default_log_level(),
            snapshot_cache_ms: default_snapshot_cache_ms(),
            admin_token: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source_path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn region_grid(&self) -> RegionGrid {
        RegionGrid::new(self.map_size_x, self.map_size_z, self.region_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !positive_finite(self.tick_rate_hz) {
            errors.push(format!(
                "tick_rate_hz must be > 0.0, got {}. Example: tick_rate_hz = 4.0",
                self.tick_rate_hz
            ));
        }

        if self.region_size < 16 {
            errors.push(format!(
                "region_size must be >= 16, got {}. Example: region_size = 512",
                self.region_size
            ));
        }

        if self.map_size_x == 0 || self.map_size_z == 0 {
            errors.push(format!(
                "map_size_x and map_size_z must be > 0, got {}x{}. Example: map_size_x = 4096",
                self.map_size_x, self.map_size_z
            ));
        }

        if !positive_finite(self.day_length_secs) {
            errors.push(format!(
                "day_length_secs must be > 0.0, got {}. Example: day_length_secs = 2880.0",
                self.day_length_secs
            ));
        }

        if !(self.transition_secs >= 0.0 && self.transition_secs.is_finite()) {
            errors.push(format!(
                "transition_secs must be >= 0.0, got {}. Example: transition_secs = 120.0",
                self.transition_secs
            ));
        }

        if !positive_finite(self.resync_interval_secs) {
            errors.push(format!(
                "resync_interval_secs must be > 0.0, got {}. Example: resync_interval_secs = 30.0",
                self.resync_interval_secs
            ));
        }

        if !positive_finite(self.flush_interval_secs) {
            errors.push(format!(
                "flush_interval_secs must be > 0.0, got {}. Example: flush_interval_secs = 60.0",
                self.flush_interval_secs
            ));
        }

        if !self.sea_level.is_finite() {
            errors.push(format!(
                "sea_level must be a finite number, got {}. Example: sea_level = 110.0",
                self.sea_level
            ));
        }

        if !(1024..=65535).contains(&self.websocket_port) {
            errors.push(format!(
                "websocket_port must be 1024-65535, got {}. Example: websocket_port = 8119",
                self.websocket_port
            ));
        }

        if self.snapshot_cache_ms == 0 {
            errors.push(format!(
                "snapshot_cache_ms must be > 0, got {}. Example: snapshot_cache_ms = 60",
                self.snapshot_cache_ms
            ));
        }

        if self.admin_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            errors.push(
                "admin_token must not be blank; remove it to disable admin commands".to_string(),
            );
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'. Example: log_level = \"info\"",
                valid_levels, self.log_level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("\n")))
        }
    }
}
