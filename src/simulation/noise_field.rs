use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::simulation::composer::CloudNoiseSource;
use crate::simulation::envelope::mix_seed;

/// Shape of one coherent noise field over `(x, z, days)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseFieldParams {
    pub octaves: usize,
    pub persistence: f64,
    /// Blocks per noise unit; larger is coarser.
    pub spatial_scale: f64,
    /// Noise units per in-game day.
    pub time_scale: f64,
}

/// Deterministic multi-octave noise, normalised to `[0, 1]`.
pub struct NoiseField {
    fbm: Fbm<Perlin>,
    params: NoiseFieldParams,
}

impl NoiseField {
    pub fn new(seed: u32, params: NoiseFieldParams) -> Self {
        let fbm = Fbm::<Perlin>::new(seed)
            .set_octaves(params.octaves)
            .set_frequency(1.0)
            .set_persistence(params.persistence);
        NoiseField { fbm, params }
    }

    pub fn sample(&self, x: f64, z: f64, days: f64) -> f64 {
        let v = self.fbm.get([
            x / self.params.spatial_scale,
            z / self.params.spatial_scale,
            days * self.params.time_scale,
        ]);
        (v * 0.5 + 0.5).clamp(0.0, 1.0)
    }
}

/// Coarse, fast-drifting cloud cover plus a finer, slower field that carves gaps.
pub const CLOUD_COVER_PARAMS: NoiseFieldParams = NoiseFieldParams {
    octaves: 4,
    persistence: 0.5,
    spatial_scale: 2048.0,
    time_scale: 2.5,
};

pub const CLOUD_GAP_PARAMS: NoiseFieldParams = NoiseFieldParams {
    octaves: 3,
    persistence: 0.6,
    spatial_scale: 640.0,
    time_scale: 0.5,
};

/// The two world-seeded fields behind precipitation.
pub struct PrecipitationNoise {
    cover: NoiseField,
    gaps: NoiseField,
}

impl PrecipitationNoise {
    pub fn new(world_seed: u64) -> Self {
        PrecipitationNoise {
            cover: NoiseField::new(mix_seed(&[world_seed, 0xC10D]) as u32, CLOUD_COVER_PARAMS),
            gaps: NoiseField::new(mix_seed(&[world_seed, 0x6A95]) as u32, CLOUD_GAP_PARAMS),
        }
    }
}

impl CloudNoiseSource for PrecipitationNoise {
    fn cover_and_gaps(&self, x: f64, z: f64, days: f64) -> (f64, f64) {
        (self.cover.sample(x, z, days), self.gaps.sample(x, z, days))
    }
}
