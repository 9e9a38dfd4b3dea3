use glam::Vec3;

use crate::config::{
    FloatRange, PrecipitationKind, WeatherEventConfig, WeatherPatternConfig, WindPatternConfig,
};
use crate::simulation::envelope::{EnvelopeConfig, EnvelopeState};

/// Linear blend written so that `t == 1.0` yields `b` exactly.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Fog, light and cloud parameters for renderers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientModifiers {
    pub fog_density: f32,
    pub cloud_density: f32,
    pub cloud_brightness: f32,
    pub light_level: f32,
    pub light_tint: [f32; 3],
}

impl Default for AmbientModifiers {
    fn default() -> Self {
        AmbientModifiers {
            fog_density: 0.0,
            cloud_density: 0.0,
            cloud_brightness: 1.0,
            light_level: 1.0,
            light_tint: [1.0, 1.0, 1.0],
        }
    }
}

impl AmbientModifiers {
    pub const ZERO: AmbientModifiers = AmbientModifiers {
        fog_density: 0.0,
        cloud_density: 0.0,
        cloud_brightness: 0.0,
        light_level: 0.0,
        light_tint: [0.0, 0.0, 0.0],
    };

    pub fn mix(&self, other: &AmbientModifiers, t: f32) -> AmbientModifiers {
        AmbientModifiers {
            fog_density: lerp(self.fog_density, other.fog_density, t),
            cloud_density: lerp(self.cloud_density, other.cloud_density, t),
            cloud_brightness: lerp(self.cloud_brightness, other.cloud_brightness, t),
            light_level: lerp(self.light_level, other.light_level, t),
            light_tint: [
                lerp(self.light_tint[0], other.light_tint[0], t),
                lerp(self.light_tint[1], other.light_tint[1], t),
                lerp(self.light_tint[2], other.light_tint[2], t),
            ],
        }
    }

    /// `self += other * weight`
    pub fn accumulate(&mut self, other: &AmbientModifiers, weight: f32) {
        self.fog_density += other.fog_density * weight;
        self.cloud_density += other.cloud_density * weight;
        self.cloud_brightness += other.cloud_brightness * weight;
        self.light_level += other.light_level * weight;
        for (dst, src) in self.light_tint.iter_mut().zip(other.light_tint) {
            *dst += src * weight;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternSample {
    pub ambient: AmbientModifiers,
    pub precipitation_bias: f32,
    pub kind: PrecipitationKind,
    pub snow_threshold: f32,
    pub particle_size: f32,
}

impl Default for PatternSample {
    fn default() -> Self {
        PatternSample {
            ambient: AmbientModifiers::default(),
            precipitation_bias: 0.0,
            kind: PrecipitationKind::Auto,
            snow_threshold: 0.5,
            particle_size: 1.0,
        }
    }
}

impl PatternSample {
    /// Blend an outgoing pattern (`self`) into an incoming one by `weight`.
    /// The categorical precipitation kind switches at the halfway point.
    pub fn mix(&self, incoming: &PatternSample, weight: f32) -> PatternSample {
        PatternSample {
            ambient: self.ambient.mix(&incoming.ambient, weight),
            precipitation_bias: lerp(self.precipitation_bias, incoming.precipitation_bias, weight),
            kind: if weight >= 0.5 { incoming.kind } else { self.kind },
            snow_threshold: lerp(self.snow_threshold, incoming.snow_threshold, weight),
            particle_size: lerp(self.particle_size, incoming.particle_size, weight),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindSample {
    /// Horizontal wind in m/s (y is always 0).
    pub velocity: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventSample {
    pub lightning_rate: f32,
    pub lightning_min_temperature: f32,
    pub precipitation_boost: f32,
    pub forced_kind: Option<PrecipitationKind>,
    pub wind_boost: f32,
}

impl EnvelopeConfig for WeatherPatternConfig {
    type Sample = PatternSample;

    fn code(&self) -> &str {
        &self.code
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn duration_secs(&self) -> FloatRange {
        self.duration_secs
    }

    fn sample(&self, envelope: &EnvelopeState) -> PatternSample {
        let t = envelope.intensity(self.intensity_variation, self.variation_period_secs);
        PatternSample {
            ambient: AmbientModifiers {
                fog_density: self.ambient.fog_density.at(t),
                cloud_density: self.ambient.cloud_density.at(t),
                cloud_brightness: self.ambient.cloud_brightness,
                light_level: self.ambient.light_level,
                light_tint: self.ambient.light_tint,
            },
            precipitation_bias: self.precipitation_bias.at(t),
            kind: self.precipitation_kind,
            snow_threshold: self.snow_threshold,
            particle_size: self.particle_size,
        }
    }
}

/// Seconds per gust cycle.
const GUST_PERIOD_SECS: f32 = 40.0;
/// Radians per second the mean wind direction veers.
const VEER_RATE: f32 = 0.0005;

impl EnvelopeConfig for WindPatternConfig {
    type Sample = WindSample;

    fn code(&self) -> &str {
        &self.code
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn duration_secs(&self) -> FloatRange {
        self.duration_secs
    }

    fn sample(&self, envelope: &EnvelopeState) -> WindSample {
        let t = envelope.intensity(self.gustiness * 0.5, GUST_PERIOD_SECS);
        let speed = self.speed.at(t);
        let angle = envelope.phase + envelope.elapsed_secs * VEER_RATE;
        WindSample {
            velocity: Vec3::new(angle.cos() * speed, 0.0, angle.sin() * speed),
        }
    }
}

impl EnvelopeConfig for WeatherEventConfig {
    type Sample = EventSample;

    fn code(&self) -> &str {
        &self.code
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn duration_secs(&self) -> FloatRange {
        self.duration_secs
    }

    fn sample(&self, envelope: &EnvelopeState) -> EventSample {
        EventSample {
            lightning_rate: self.lightning_rate.at(envelope.strength),
            lightning_min_temperature: self.lightning_min_temperature,
            precipitation_boost: self.precipitation_boost,
            forced_kind: self.forced_kind,
            wind_boost: self.wind_boost,
        }
    }
}
