use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

/// World-generation climate at a map column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    /// Sea-level temperature in °C.
    pub temperature: f32,
    /// Annual rainfall, 0.0-1.0.
    pub rainfall: f32,
}

/// Source of static climate data and terrain height.
///
/// The weather core never generates terrain itself; it only reads these values
/// from whatever produced the world.
pub trait ClimateProvider: Send + Sync {
    fn climate_at(&self, x: f64, z: f64) -> ClimateSample;

    /// Height of the terrain surface (first solid block) at the column.
    fn surface_height(&self, x: f64, z: f64) -> f64;
}

/// Seeded Perlin climate: smooth temperature and rainfall bands plus rolling terrain.
pub struct NoiseClimate {
    temperature: Perlin,
    rainfall: Perlin,
    terrain: Fbm<Perlin>,
    sea_level: f64,
}

impl NoiseClimate {
    pub fn new(world_seed: u64, sea_level: f64) -> Self {
        let base = (world_seed ^ (world_seed >> 32)) as u32;
        NoiseClimate {
            temperature: Perlin::new(base.wrapping_add(11)),
            rainfall: Perlin::new(base.wrapping_add(23)),
            terrain: Fbm::<Perlin>::new(base.wrapping_add(37))
                .set_octaves(4)
                .set_frequency(1.0 / 600.0)
                .set_persistence(0.5),
            sea_level,
        }
    }
}

impl ClimateProvider for NoiseClimate {
    fn climate_at(&self, x: f64, z: f64) -> ClimateSample {
        let scale = 1.0 / 4096.0;
        let t = self.temperature.get([x * scale, z * scale]) as f32;
        let r = self.rainfall.get([x * scale + 100.0, z * scale + 100.0]) as f32;
        ClimateSample {
            temperature: 12.0 + t * 18.0,
            rainfall: (0.5 + r * 0.5).clamp(0.0, 1.0),
        }
    }

    fn surface_height(&self, x: f64, z: f64) -> f64 {
        let h = self.terrain.get([x, z]);
        (self.sea_level + 8.0 + h * 40.0).max(self.sea_level - 20.0)
    }
}

/// The same climate everywhere. Handy for tools and tests that want fixed inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformClimate {
    pub climate: ClimateSample,
    pub surface_height: f64,
}

impl ClimateProvider for UniformClimate {
    fn climate_at(&self, _x: f64, _z: f64) -> ClimateSample {
        self.climate
    }

    fn surface_height(&self, _x: f64, _z: f64) -> f64 {
        self.surface_height
    }
}
