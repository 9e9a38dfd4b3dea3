pub mod composer;
pub mod envelope;
pub mod events;
pub mod noise_field;
pub mod pattern;
pub mod region;
pub mod region_state;
pub mod snapshot;
pub mod weather_world;

pub use composer::{GlobalOverrides, PrecipitationType, WindSmoother};
pub use envelope::{EnvelopeConfig, EnvelopeState};
pub use events::{DispatchOutcome, EventBus, Handling, LightningStrike};
pub use region::{RegionChanges, RegionStateError, RegionTiming, WeatherSimulationRegion};
pub use region_state::{RegionSample, RegionSource, RegionWeatherState};
pub use snapshot::{PointContext, PointSampler, PrecipitationState, WeatherDataSnapshot};
pub use weather_world::{
    RegionDelta, TickOutput, WeatherWorld, WeatherWorldSettings, WorldCommandError,
};
