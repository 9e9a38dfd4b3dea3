//! Pure precipitation, temperature and wind functions.
//!
//! Everything here is a function of its arguments; the noise itself sits
//! behind [`CloudNoiseSource`] so callers (and tests) decide where the cover
//! and gap values come from.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::PrecipitationKind;

/// Source of the two cloud fields at a point in space and time.
pub trait CloudNoiseSource: Send + Sync {
    /// Returns `(cover, gaps)`, both in `[0, 1]`.
    fn cover_and_gaps(&self, x: f64, z: f64, days: f64) -> (f64, f64);
}

/// Server-owned global overrides, broadcast to every client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalOverrides {
    /// Forces precipitation everywhere when set.
    pub override_precipitation: Option<f32>,
    /// Added to the noise time input.
    pub rain_cloud_days_offset: f64,
    /// Cloud layer height relative to the default.
    pub cloud_level_rel: f32,
}

impl Default for GlobalOverrides {
    fn default() -> Self {
        GlobalOverrides {
            override_precipitation: None,
            rain_cloud_days_offset: 0.0,
            cloud_level_rel: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrecipitationType {
    #[default]
    Rain,
    Snow,
    Hail,
}

/// Climate contribution to the rain bias: wet climates push toward rain.
pub fn climate_rain_bias(rainfall: f32) -> f32 {
    ((rainfall - 0.6) * 2.0).clamp(-1.0, 1.0)
}

/// Total rain bias fed to [`cloudiness`].
pub fn rain_bias(climate_bias: f32, pattern_bias: f32, event_boost: f32) -> f32 {
    (climate_bias + pattern_bias + event_boost).clamp(-1.0, 1.0)
}

/// `max(0, cover*1.6 - clamp(gaps*5 - 1 - bias, 0, 1) + bias)`
///
/// The gap field carves holes into the cover; a positive bias both fills the
/// holes and raises the cover.
pub fn cloudiness(cover: f64, gaps: f64, bias: f32) -> f32 {
    let bias = f64::from(bias).clamp(-1.0, 1.0);
    let carve = (gaps * 5.0 - 1.0 - bias).clamp(0.0, 1.0);
    (cover * 1.6 - carve + bias).max(0.0) as f32
}

/// Cloudiness above one half rains. NaN maps to no precipitation.
pub fn precipitation_from_cloudiness(cloudiness: f32) -> f32 {
    (cloudiness - 0.5).max(0.0)
}

/// Precipitation at a point from the raw noise values and the rain bias,
/// honouring the global override.
pub fn compose_precipitation(
    cover: f64,
    gaps: f64,
    bias: f32,
    override_precipitation: Option<f32>,
) -> f32 {
    let c = match override_precipitation {
        Some(p) => p + 0.5,
        None => cloudiness(cover, gaps, bias),
    };
    precipitation_from_cloudiness(c)
}

/// Events may force a type; otherwise explicit pattern kinds win and `Auto`
/// falls back to temperature.
pub fn resolve_precipitation_type(
    kind: PrecipitationKind,
    forced: Option<PrecipitationKind>,
    temperature: f32,
    snow_threshold: f32,
) -> PrecipitationType {
    match forced.unwrap_or(kind) {
        PrecipitationKind::Rain => PrecipitationType::Rain,
        PrecipitationKind::Snow => PrecipitationType::Snow,
        PrecipitationKind::Hail => PrecipitationType::Hail,
        PrecipitationKind::Auto if temperature < snow_threshold => PrecipitationType::Snow,
        PrecipitationKind::Auto => PrecipitationType::Rain,
    }
}

/// °C lost per block above sea level.
pub const LAPSE_RATE: f64 = 1.0 / 30.0;

pub fn temperature_at_altitude(sea_level_temperature: f32, y: f64, sea_level: f64) -> f32 {
    let above = (y - sea_level).max(0.0);
    (f64::from(sea_level_temperature) - above * LAPSE_RATE) as f32
}

/// Wind strengthens with height above the terrain, up to 2.5x.
pub fn altitude_wind_factor(y: f64, surface_height: f64) -> f32 {
    let above = (y - surface_height).max(0.0);
    (1.0 + (above / 100.0).min(1.5)) as f32
}

/// Three incommensurate sines, normalised to `[-1, 1]`.
pub fn gust_perturbation(t: f32) -> f32 {
    ((t * 0.7).sin() + (t * 1.9).sin() * 0.5 + (t * 4.3).sin() * 0.25) / 1.75
}

/// Relative amplitude of the gust term against the smoothed speed.
const GUST_AMPLITUDE: f32 = 0.15;

/// First-order lag toward a target wind vector with a gust wobble on x.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindSmoother {
    smoothed: Vec3,
    clock: f32,
}

impl WindSmoother {
    pub fn new(initial: Vec3) -> Self {
        WindSmoother {
            smoothed: initial,
            clock: 0.0,
        }
    }

    pub fn update(&mut self, target: Vec3, dt: f32) -> Vec3 {
        let factor = dt.clamp(0.0, 1.0);
        self.smoothed += (target - self.smoothed) * factor;
        self.clock += dt.max(0.0);
        self.value()
    }

    /// Smoothed wind without the gust term.
    pub fn smoothed(&self) -> Vec3 {
        self.smoothed
    }

    pub fn value(&self) -> Vec3 {
        let gust = gust_perturbation(self.clock) * GUST_AMPLITUDE * self.smoothed.length();
        self.smoothed + Vec3::new(gust, 0.0, 0.0)
    }
}
