pub mod climate;
pub mod region;

pub use climate::{ClimateProvider, ClimateSample, NoiseClimate, UniformClimate};
pub use region::{MapRegionKey, RegionGrid};
