pub mod patterns;
pub mod simulation;

pub use patterns::{
    AmbientConfig, AssetError, FloatRange, PrecipitationKind, WeatherEventConfig,
    WeatherPatternAssets, WeatherPatternConfig, WindPatternConfig,
};
pub use simulation::{ConfigError, SimulationConfig};
