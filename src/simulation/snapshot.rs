use glam::{DVec3, Vec3};
use std::sync::Arc;

use crate::simulation::composer::{
    CloudNoiseSource, GlobalOverrides, PrecipitationType, climate_rain_bias,
    compose_precipitation, rain_bias, resolve_precipitation_type, temperature_at_altitude,
};
use crate::simulation::pattern::AmbientModifiers;
use crate::simulation::region_state::RegionSample;
use crate::world::{ClimateProvider, ClimateSample};

/// Blended weather at one observer position. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherDataSnapshot {
    pub ambient: AmbientModifiers,
    pub precipitation: f32,
    pub precipitation_type: PrecipitationType,
    pub particle_size: f32,
    /// Wind at terrain level, before altitude scaling and smoothing.
    pub wind: Vec3,
    /// °C at the observer's altitude.
    pub temperature: f32,
    pub snow_threshold: f32,
    /// Strikes per minute per region.
    pub lightning_rate: f32,
    pub cloud_level_rel: f32,
}

impl Default for WeatherDataSnapshot {
    fn default() -> Self {
        WeatherDataSnapshot {
            ambient: AmbientModifiers::default(),
            precipitation: 0.0,
            precipitation_type: PrecipitationType::Rain,
            particle_size: 1.0,
            wind: Vec3::ZERO,
            temperature: 15.0,
            snow_threshold: 0.5,
            lightning_rate: 0.0,
            cloud_level_rel: 0.0,
        }
    }
}

/// Precipitation summary for particle systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecipitationState {
    pub level: f32,
    pub particle_size: f32,
    pub kind: PrecipitationType,
}

impl WeatherDataSnapshot {
    pub fn precipitation_state(&self) -> PrecipitationState {
        PrecipitationState {
            level: self.precipitation,
            particle_size: self.particle_size,
            kind: self.precipitation_type,
        }
    }

    pub fn is_precipitating(&self) -> bool {
        self.precipitation > 0.0
    }
}

/// Point data shared by every region contributing to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointContext {
    pub position: DVec3,
    pub sea_level: f64,
    pub climate: ClimateSample,
    /// Cloud cover noise at the point, already time-shifted.
    pub cover: f64,
    pub gaps: f64,
    pub overrides: GlobalOverrides,
}

/// Builds [`PointContext`]s from the world's noise and climate.
///
/// Server and clients construct one from the same world seed, so both see
/// identical clouds.
#[derive(Clone)]
pub struct PointSampler {
    noise: Arc<dyn CloudNoiseSource>,
    climate: Arc<dyn ClimateProvider>,
    sea_level: f64,
}

impl PointSampler {
    pub fn new(
        noise: Arc<dyn CloudNoiseSource>,
        climate: Arc<dyn ClimateProvider>,
        sea_level: f64,
    ) -> Self {
        PointSampler {
            noise,
            climate,
            sea_level,
        }
    }

    pub fn climate(&self) -> &dyn ClimateProvider {
        self.climate.as_ref()
    }

    pub fn sea_level(&self) -> f64 {
        self.sea_level
    }

    pub fn context(&self, position: DVec3, days: f64, overrides: GlobalOverrides) -> PointContext {
        let time = days + overrides.rain_cloud_days_offset;
        let (cover, gaps) = self.noise.cover_and_gaps(position.x, position.z, time);
        PointContext {
            position,
            sea_level: self.sea_level,
            climate: self.climate.climate_at(position.x, position.z),
            cover,
            gaps,
            overrides,
        }
    }
}

impl std::fmt::Debug for PointSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointSampler")
            .field("sea_level", &self.sea_level)
            .finish_non_exhaustive()
    }
}

/// One region's weather evaluated at the context point.
pub fn compose_region_snapshot(sample: &RegionSample, ctx: &PointContext) -> WeatherDataSnapshot {
    let pattern = &sample.pattern;
    let event = &sample.event;

    let temperature =
        temperature_at_altitude(ctx.climate.temperature, ctx.position.y, ctx.sea_level);
    let bias = rain_bias(
        climate_rain_bias(ctx.climate.rainfall),
        pattern.precipitation_bias,
        event.precipitation_boost,
    );
    let precipitation = compose_precipitation(
        ctx.cover,
        ctx.gaps,
        bias,
        ctx.overrides.override_precipitation,
    );
    let precipitation_type = resolve_precipitation_type(
        pattern.kind,
        event.forced_kind,
        temperature,
        pattern.snow_threshold,
    );
    let lightning_rate =
        if precipitation > 0.0 && temperature >= event.lightning_min_temperature {
            event.lightning_rate
        } else {
            0.0
        };

    WeatherDataSnapshot {
        ambient: pattern.ambient,
        precipitation,
        precipitation_type,
        particle_size: pattern.particle_size,
        wind: sample.wind.velocity * (1.0 + event.wind_boost),
        temperature,
        snow_threshold: pattern.snow_threshold,
        lightning_rate,
        cloud_level_rel: ctx.overrides.cloud_level_rel,
    }
}

/// Weighted sum of snapshots. Zero weights are skipped, so a single unit
/// weight reproduces that snapshot exactly. The precipitation type comes from
/// the heaviest contributor.
pub fn blend(weighted: &[(f32, WeatherDataSnapshot)]) -> WeatherDataSnapshot {
    let mut out = WeatherDataSnapshot {
        ambient: AmbientModifiers::ZERO,
        precipitation: 0.0,
        precipitation_type: PrecipitationType::Rain,
        particle_size: 0.0,
        wind: Vec3::ZERO,
        temperature: 0.0,
        snow_threshold: 0.0,
        lightning_rate: 0.0,
        cloud_level_rel: 0.0,
    };
    let mut heaviest = 0.0_f32;
    let mut any = false;

    for (w, s) in weighted {
        let w = *w;
        if !(w > 0.0) {
            continue;
        }
        any = true;
        out.ambient.accumulate(&s.ambient, w);
        out.precipitation += s.precipitation * w;
        out.particle_size += s.particle_size * w;
        out.wind += s.wind * w;
        out.temperature += s.temperature * w;
        out.snow_threshold += s.snow_threshold * w;
        out.lightning_rate += s.lightning_rate * w;
        out.cloud_level_rel += s.cloud_level_rel * w;
        if w > heaviest {
            heaviest = w;
            out.precipitation_type = s.precipitation_type;
        }
    }

    if any { out } else { WeatherDataSnapshot::default() }
}
