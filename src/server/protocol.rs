use serde::{Deserialize, Serialize};

use crate::config::WeatherPatternAssets;
use crate::simulation::composer::GlobalOverrides;
use crate::simulation::events::LightningStrike;
use crate::simulation::region_state::RegionWeatherState;
use crate::simulation::weather_world::RegionDelta;

/// Every message the server pushes over the WebSocket, tagged by
/// `message_type` in the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum ServerMessage {
    /// One region's full weather state.
    WeatherState {
        region_x: i32,
        region_z: i32,
        update_instant: bool,
        state: RegionWeatherState,
    },
    /// Global precipitation overrides; last write wins.
    WeatherConfig {
        override_precipitation: Option<f32>,
        rain_cloud_days_offset: f64,
    },
    WeatherPatternAssets {
        assets: WeatherPatternAssets,
    },
    LightningFlash {
        region_x: i32,
        region_z: i32,
        x: f64,
        y: f64,
        z: f64,
        seed: u64,
    },
    WeatherCloudYpos {
        cloud_level_rel: f32,
    },
    /// Clock and seed the client needs to reproduce the server's clouds.
    WorldClock {
        total_days: f64,
        day_length_secs: f32,
        world_seed: u64,
    },
}

impl ServerMessage {
    pub fn from_delta(delta: &RegionDelta) -> Self {
        ServerMessage::WeatherState {
            region_x: delta.key.x,
            region_z: delta.key.z,
            update_instant: delta.update_instant,
            state: delta.state.clone(),
        }
    }

    pub fn weather_config(overrides: &GlobalOverrides) -> Self {
        ServerMessage::WeatherConfig {
            override_precipitation: overrides.override_precipitation,
            rain_cloud_days_offset: overrides.rain_cloud_days_offset,
        }
    }

    pub fn cloud_ypos(overrides: &GlobalOverrides) -> Self {
        ServerMessage::WeatherCloudYpos {
            cloud_level_rel: overrides.cloud_level_rel,
        }
    }

    pub fn lightning(strike: &LightningStrike) -> Self {
        ServerMessage::LightningFlash {
            region_x: strike.region.x,
            region_z: strike.region.z,
            x: strike.position.x,
            y: strike.position.y,
            z: strike.position.z,
            seed: strike.seed,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Operator commands a client may send, tagged by `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum AdminCommand {
    SetPattern {
        region_x: i32,
        region_z: i32,
        code: String,
        #[serde(default)]
        instant: bool,
    },
    /// `null` returns to simulated precipitation.
    SetPrecipitationOverride { value: Option<f32> },
    SetRainCloudDaysOffset { days: f64 },
    SetCloudLevel { level: f32 },
    ReloadAssets,
}

impl AdminCommand {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// What a client actually sends: a command plus the operator token, in one
/// flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub token: String,
    #[serde(flatten)]
    pub command: AdminCommand,
}

impl AdminRequest {
    pub fn new(token: impl Into<String>, command: AdminCommand) -> Self {
        AdminRequest {
            token: token.into(),
            command,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Health endpoint response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub tick: u64,
    pub tick_rate: f32,
    pub total_days: f64,
    pub loaded_regions: usize,
    pub connected_clients: usize,
    pub overrides: GlobalOverrides,
}
