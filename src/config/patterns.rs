use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors raised while loading the weather pattern asset file.
///
/// These are the only weather errors treated as fatal: the server refuses to
/// start without a usable set of pattern definitions.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("cannot encode pattern assets: {0}")]
    Encode(String),
    #[error("invalid pattern assets:\n{0}")]
    Invalid(String),
}

/// Inclusive `min..=max` range rolled by a pattern envelope.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatRange {
    pub min: f32,
    pub max: f32,
}

impl FloatRange {
    pub const fn new(min: f32, max: f32) -> Self {
        FloatRange { min, max }
    }

    pub const fn fixed(value: f32) -> Self {
        FloatRange { min: value, max: value }
    }

    /// Point at `t` (0 = min, 1 = max).
    pub fn at(&self, t: f32) -> f32 {
        self.min * (1.0 - t) + self.max * t
    }

    pub fn is_ordered(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// How a pattern decides its precipitation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrecipitationKind {
    /// Snow below the pattern's snow threshold, rain above it.
    #[default]
    Auto,
    Rain,
    Snow,
    Hail,
}

/// Fog, light and cloud modifiers applied while a pattern is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientConfig {
    #[serde(default)]
    pub fog_density: FloatRange,
    #[serde(default = "default_cloud_density")]
    pub cloud_density: FloatRange,
    #[serde(default = "default_one")]
    pub cloud_brightness: f32,
    #[serde(default = "default_one")]
    pub light_level: f32,
    #[serde(default = "default_tint")]
    pub light_tint: [f32; 3],
}

impl Default for AmbientConfig {
    fn default() -> Self {
        AmbientConfig {
            fog_density: FloatRange::default(),
            cloud_density: default_cloud_density(),
            cloud_brightness: 1.0,
            light_level: 1.0,
            light_tint: default_tint(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherPatternConfig {
    pub code: String,
    pub name: String,
    #[serde(default = "default_one")]
    pub weight: f32,
    pub duration_secs: FloatRange,
    #[serde(default)]
    pub ambient: AmbientConfig,
    /// Added to the climate rain bias while this pattern is active.
    #[serde(default)]
    pub precipitation_bias: FloatRange,
    #[serde(default)]
    pub precipitation_kind: PrecipitationKind,
    /// °C below which `Auto` precipitation falls as snow.
    #[serde(default = "default_snow_threshold")]
    pub snow_threshold: f32,
    #[serde(default = "default_particle_size")]
    pub particle_size: f32,
    /// Relative wobble of the intensity envelope around the rolled strength.
    #[serde(default = "default_variation")]
    pub intensity_variation: f32,
    #[serde(default = "default_variation_period")]
    pub variation_period_secs: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindPatternConfig {
    pub code: String,
    pub name: String,
    #[serde(default = "default_one")]
    pub weight: f32,
    pub duration_secs: FloatRange,
    /// Wind speed in m/s.
    pub speed: FloatRange,
    #[serde(default)]
    pub gustiness: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherEventConfig {
    pub code: String,
    pub name: String,
    #[serde(default = "default_one")]
    pub weight: f32,
    pub duration_secs: FloatRange,
    /// Lightning strikes per minute per region while it is precipitating.
    #[serde(default)]
    pub lightning_rate: FloatRange,
    #[serde(default)]
    pub lightning_min_temperature: f32,
    #[serde(default)]
    pub precipitation_boost: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_kind: Option<PrecipitationKind>,
    #[serde(default)]
    pub wind_boost: f32,
}

/// All data-driven weather definitions. Append-only in practice: clients
/// and servers running different builds may disagree on the list length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherPatternAssets {
    pub patterns: Vec<WeatherPatternConfig>,
    pub wind_patterns: Vec<WindPatternConfig>,
    pub events: Vec<WeatherEventConfig>,
}

fn default_one() -> f32 {
    1.0
}
fn default_cloud_density() -> FloatRange {
    FloatRange::new(0.1, 0.3)
}
fn default_tint() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}
fn default_snow_threshold() -> f32 {
    0.5
}
fn default_particle_size() -> f32 {
    1.0
}
fn default_variation() -> f32 {
    0.1
}
fn default_variation_period() -> f32 {
    180.0
}

impl WeatherPatternAssets {
    pub fn from_file(path: &Path) -> Result<Self, AssetError> {
        let content = std::fs::read_to_string(path).map_err(|source| AssetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, AssetError> {
        let assets: WeatherPatternAssets =
            toml::from_str(content).map_err(|e| AssetError::Parse {
                path: source_path.to_path_buf(),
                message: e.to_string(),
            })?;
        assets.validate()?;
        Ok(assets)
    }

    pub fn to_toml_string(&self) -> Result<String, AssetError> {
        toml::to_string_pretty(self).map_err(|e| AssetError::Encode(e.to_string()))
    }

    /// Check every definition, reporting all problems at once.
    pub fn validate(&self) -> Result<(), AssetError> {
        let mut errors = Vec::new();

        if self.patterns.is_empty() {
            errors.push("at least one [[patterns]] entry is required".to_string());
        }
        if self.wind_patterns.is_empty() {
            errors.push("at least one [[wind_patterns]] entry is required".to_string());
        }
        if self.events.is_empty() {
            errors.push("at least one [[events]] entry is required (e.g. code = \"noevent\")".to_string());
        }

        let common = self
            .patterns
            .iter()
            .map(|p| ("patterns", p.code.as_str(), p.weight, p.duration_secs))
            .chain(
                self.wind_patterns
                    .iter()
                    .map(|w| ("wind_patterns", w.code.as_str(), w.weight, w.duration_secs)),
            )
            .chain(
                self.events
                    .iter()
                    .map(|e| ("events", e.code.as_str(), e.weight, e.duration_secs)),
            );
        for (table, code, weight, duration) in common {
            if code.is_empty() {
                errors.push(format!("{}: code must not be empty", table));
            }
            if !(weight.is_finite() && weight >= 0.0) {
                errors.push(format!("{} '{}': weight must be >= 0.0, got {}", table, code, weight));
            }
            if !duration.is_ordered() || duration.min <= 0.0 {
                errors.push(format!(
                    "{} '{}': duration_secs must satisfy 0 < min <= max, got {}..{}",
                    table, code, duration.min, duration.max
                ));
            }
        }

        for p in &self.patterns {
            for (field, range) in [
                ("ambient.fog_density", p.ambient.fog_density),
                ("ambient.cloud_density", p.ambient.cloud_density),
                ("precipitation_bias", p.precipitation_bias),
            ] {
                if !range.is_ordered() {
                    errors.push(format!(
                        "patterns '{}': {} must satisfy min <= max, got {}..{}",
                        p.code, field, range.min, range.max
                    ));
                }
            }
            if p.variation_period_secs <= 0.0 {
                errors.push(format!(
                    "patterns '{}': variation_period_secs must be > 0, got {}",
                    p.code, p.variation_period_secs
                ));
            }
        }
        for w in &self.wind_patterns {
            if !w.speed.is_ordered() || w.speed.min < 0.0 {
                errors.push(format!(
                    "wind_patterns '{}': speed must satisfy 0 <= min <= max, got {}..{}",
                    w.code, w.speed.min, w.speed.max
                ));
            }
        }
        for e in &self.events {
            if !e.lightning_rate.is_ordered() || e.lightning_rate.min < 0.0 {
                errors.push(format!(
                    "events '{}': lightning_rate must satisfy 0 <= min <= max",
                    e.code
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AssetError::Invalid(errors.join("\n")))
        }
    }

    pub fn pattern_index(&self, code: &str) -> Option<usize> {
        self.patterns.iter().position(|p| p.code == code)
    }

    /// The stock pattern set written by `regionweather init`.
    pub fn builtin() -> Self {
        let pattern = |code: &str, name: &str, weight: f32| WeatherPatternConfig {
            code: code.to_string(),
            name: name.to_string(),
            weight,
            duration_secs: FloatRange::new(600.0, 1800.0),
            ambient: AmbientConfig::default(),
            precipitation_bias: FloatRange::default(),
            precipitation_kind: PrecipitationKind::Auto,
            snow_threshold: default_snow_threshold(),
            particle_size: default_particle_size(),
            intensity_variation: default_variation(),
            variation_period_secs: default_variation_period(),
        };

        let clear = WeatherPatternConfig {
            precipitation_bias: FloatRange::new(-0.6, -0.3),
            ambient: AmbientConfig {
                cloud_density: FloatRange::new(0.0, 0.15),
                ..AmbientConfig::default()
            },
            ..pattern("clear", "Clear skies", 3.0)
        };
        let overcast = WeatherPatternConfig {
            precipitation_bias: FloatRange::new(-0.1, 0.1),
            ambient: AmbientConfig {
                cloud_density: FloatRange::new(0.5, 0.8),
                cloud_brightness: 0.8,
                light_level: 0.85,
                ..AmbientConfig::default()
            },
            ..pattern("overcast", "Overcast", 2.0)
        };
        let rain = WeatherPatternConfig {
            precipitation_bias: FloatRange::new(0.5, 0.9),
            ambient: AmbientConfig {
                fog_density: FloatRange::new(0.0, 0.1),
                cloud_density: FloatRange::new(0.7, 1.0),
                cloud_brightness: 0.6,
                light_level: 0.7,
                light_tint: [0.85, 0.88, 0.95],
            },
            ..pattern("rain", "Steady rain", 1.5)
        };
        let foggy = WeatherPatternConfig {
            duration_secs: FloatRange::new(300.0, 900.0),
            precipitation_bias: FloatRange::new(-0.3, 0.0),
            ambient: AmbientConfig {
                fog_density: FloatRange::new(0.3, 0.6),
                cloud_density: FloatRange::new(0.3, 0.5),
                light_level: 0.8,
                ..AmbientConfig::default()
            },
            ..pattern("foggy", "Fog", 0.8)
        };
        let blizzard = WeatherPatternConfig {
            duration_secs: FloatRange::new(300.0, 900.0),
            precipitation_bias: FloatRange::new(0.7, 1.0),
            precipitation_kind: PrecipitationKind::Snow,
            particle_size: 1.4,
            ambient: AmbientConfig {
                fog_density: FloatRange::new(0.2, 0.4),
                cloud_density: FloatRange::new(0.9, 1.0),
                cloud_brightness: 0.7,
                light_level: 0.6,
                light_tint: [0.92, 0.95, 1.0],
            },
            ..pattern("blizzard", "Blizzard", 0.3)
        };

        let wind = |code: &str, name: &str, weight: f32, speed: FloatRange, gustiness: f32| {
            WindPatternConfig {
                code: code.to_string(),
                name: name.to_string(),
                weight,
                duration_secs: FloatRange::new(300.0, 1200.0),
                speed,
                gustiness,
            }
        };

        let event = |code: &str, name: &str, weight: f32| WeatherEventConfig {
            code: code.to_string(),
            name: name.to_string(),
            weight,
            duration_secs: FloatRange::new(300.0, 900.0),
            lightning_rate: FloatRange::default(),
            lightning_min_temperature: 0.0,
            precipitation_boost: 0.0,
            forced_kind: None,
            wind_boost: 0.0,
        };

        WeatherPatternAssets {
            patterns: vec![clear, overcast, rain, foggy, blizzard],
            wind_patterns: vec![
                wind("still", "Still air", 1.0, FloatRange::new(0.0, 1.0), 0.0),
                wind("breeze", "Light breeze", 3.0, FloatRange::new(2.0, 6.0), 0.2),
                wind("windy", "Windy", 1.5, FloatRange::new(8.0, 14.0), 0.4),
                wind("gale", "Gale", 0.3, FloatRange::new(17.0, 24.0), 0.6),
            ],
            events: vec![
                event("noevent", "No event", 6.0),
                WeatherEventConfig {
                    lightning_rate: FloatRange::new(2.0, 8.0),
                    lightning_min_temperature: 4.0,
                    precipitation_boost: 0.2,
                    wind_boost: 0.3,
                    ..event("thunderstorm", "Thunderstorm", 1.0)
                },
                WeatherEventConfig {
                    duration_secs: FloatRange::new(60.0, 240.0),
                    precipitation_boost: 0.3,
                    forced_kind: Some(PrecipitationKind::Hail),
                    ..event("hailshower", "Hail shower", 0.3)
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_path() -> PathBuf {
        PathBuf::from("weather-patterns.toml")
    }

    #[test]
    fn builtin_assets_validate() {
        let assets = WeatherPatternAssets::builtin();
        assets.validate().unwrap();
        assert_eq!(assets.patterns.len(), 5);
        assert_eq!(assets.pattern_index("rain"), Some(2));
        assert_eq!(assets.pattern_index("tornado"), None);
    }

    #[test]
    fn builtin_assets_survive_toml_round_trip() {
        let assets = WeatherPatternAssets::builtin();
        let toml = assets.to_toml_string().unwrap();
        let parsed = WeatherPatternAssets::from_toml_str(&toml, &test_path()).unwrap();
        assert_eq!(parsed, assets);
    }

    #[test]
    fn minimal_file_applies_defaults() {
        let toml = r#"
            [[patterns]]
            code = "clear"
            name = "Clear"
            duration_secs = { min = 60.0, max = 120.0 }

            [[wind_patterns]]
            code = "still"
            name = "Still"
            duration_secs = { min = 60.0, max = 60.0 }
            speed = { min = 0.0, max = 1.0 }

            [[events]]
            code = "noevent"
            name = "None"
            duration_secs = { min = 30.0, max = 30.0 }
        "#;
        let assets = WeatherPatternAssets::from_toml_str(toml, &test_path()).unwrap();
        let clear = &assets.patterns[0];
        assert_eq!(clear.weight, 1.0);
        assert_eq!(clear.precipitation_kind, PrecipitationKind::Auto);
        assert_eq!(clear.snow_threshold, 0.5);
        assert_eq!(clear.ambient.light_tint, [1.0, 1.0, 1.0]);
        assert_eq!(assets.events[0].forced_kind, None);
    }

    #[test]
    fn empty_lists_are_rejected() {
        let assets = WeatherPatternAssets {
            patterns: vec![],
            wind_patterns: vec![],
            events: vec![],
        };
        let err = assets.validate().unwrap_err().to_string();
        assert!(err.contains("[[patterns]]"));
        assert!(err.contains("[[wind_patterns]]"));
        assert!(err.contains("[[events]]"));
    }

    #[test]
    fn inverted_duration_is_rejected() {
        let mut assets = WeatherPatternAssets::builtin();
        assets.patterns[1].duration_secs = FloatRange::new(100.0, 10.0);
        let err = assets.validate().unwrap_err().to_string();
        assert!(err.contains("overcast"));
        assert!(err.contains("duration_secs"));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut assets = WeatherPatternAssets::builtin();
        assets.wind_patterns[0].weight = -1.0;
        let err = assets.validate().unwrap_err().to_string();
        assert!(err.contains("still"));
        assert!(err.contains("weight"));
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let err = WeatherPatternAssets::from_toml_str("[[patterns]\n", &test_path()).unwrap_err();
        assert!(err.to_string().contains("weather-patterns.toml"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = WeatherPatternAssets::from_file(Path::new("/nonexistent/patterns.toml"))
            .unwrap_err();
        assert!(matches!(err, AssetError::Read { .. }));
    }

    #[test]
    fn float_range_endpoints_are_exact() {
        let r = FloatRange::new(0.3, 0.9);
        assert_eq!(r.at(0.0), 0.3);
        assert_eq!(r.at(1.0), 0.9);
        assert!(FloatRange::fixed(2.0).is_ordered());
        assert!(!FloatRange::new(1.0, 0.0).is_ordered());
    }
}
