//! Sampled stochastic envelopes.
//!
//! Weather patterns, wind patterns and weather events are all the same small
//! state machine: pick a definition by weight, roll a seed, a duration and an
//! envelope, run until the duration elapses. `EnvelopeState` is that state;
//! `EnvelopeConfig` is implemented by each definition kind and turns the state
//! into a kind-specific sample.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

use crate::config::FloatRange;
use crate::world::MapRegionKey;

/// A data-driven definition that can drive an envelope.
pub trait EnvelopeConfig {
    type Sample: Default;

    fn code(&self) -> &str;
    fn weight(&self) -> f32;
    fn duration_secs(&self) -> FloatRange;

    /// Pure function of the envelope's roll and elapsed time.
    fn sample(&self, envelope: &EnvelopeState) -> Self::Sample;
}

/// Runtime state of one active pattern, wind pattern or event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeState {
    /// Index into the definition list. May be out of range when client and
    /// server run different asset versions; always read through `clamp_index`.
    pub index: u32,
    pub seed: u64,
    pub elapsed_secs: f32,
    pub duration_secs: f32,
    /// Rolled base intensity in [0, 1].
    pub strength: f32,
    /// Rolled phase in [0, TAU).
    pub phase: f32,
}

impl EnvelopeState {
    /// Activate definition `index` with a seed derived by the caller.
    /// Duration, strength and phase are rolled from that seed alone.
    pub fn initialize<C: EnvelopeConfig>(configs: &[C], index: usize, seed: u64) -> Self {
        let index = clamp_index(index, configs.len());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let duration_roll: f32 = rng.gen_range(0.0..=1.0);
        let strength: f32 = rng.gen_range(0.0..=1.0);
        let phase: f32 = rng.gen_range(0.0..TAU);
        let duration_secs = configs
            .get(index)
            .map(|c| c.duration_secs().at(duration_roll))
            .unwrap_or(f32::MAX);

        EnvelopeState {
            index: index as u32,
            seed,
            elapsed_secs: 0.0,
            duration_secs,
            strength,
            phase,
        }
    }

    /// Inert state on definition 0 that never expires.
    pub fn placeholder() -> Self {
        EnvelopeState {
            index: 0,
            seed: 0,
            elapsed_secs: 0.0,
            duration_secs: f32::MAX,
            strength: 0.5,
            phase: 0.0,
        }
    }

    /// Reset envelope timers; the roll is kept.
    pub fn on_begin_use(&mut self) {
        self.elapsed_secs = 0.0;
    }

    pub fn advance(&mut self, dt: f32) {
        if dt > 0.0 {
            self.elapsed_secs += dt;
        }
    }

    pub fn expired(&self) -> bool {
        self.elapsed_secs >= self.duration_secs
    }

    pub fn progress(&self) -> f32 {
        if self.duration_secs <= 0.0 {
            return 1.0;
        }
        (self.elapsed_secs / self.duration_secs).clamp(0.0, 1.0)
    }

    /// Definition this envelope runs, clamped to the last valid index.
    pub fn config<'a, C: EnvelopeConfig>(&self, configs: &'a [C]) -> Option<&'a C> {
        configs.get(clamp_index(self.index as usize, configs.len()))
    }

    pub fn sample<C: EnvelopeConfig>(&self, configs: &[C]) -> C::Sample {
        self.config(configs)
            .map(|c| c.sample(self))
            .unwrap_or_default()
    }

    /// Strength wobbled by a slow sine, clamped to [0, 1].
    pub fn intensity(&self, variation: f32, period_secs: f32) -> f32 {
        let period = period_secs.max(f32::EPSILON);
        let wobble = (TAU * self.elapsed_secs / period + self.phase).sin();
        (self.strength + variation * wobble).clamp(0.0, 1.0)
    }
}

/// Out-of-range indices resolve to the last definition.
pub fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

/// Pick a definition index proportionally to weight. Uniform if every weight is zero.
pub fn select_weighted<C: EnvelopeConfig>(configs: &[C], rng: &mut impl Rng) -> usize {
    if configs.is_empty() {
        return 0;
    }
    let total: f32 = configs.iter().map(|c| c.weight().max(0.0)).sum();
    if !(total > 0.0) {
        return rng.gen_range(0..configs.len());
    }

    let mut roll = rng.gen_range(0.0..total);
    for (i, c) in configs.iter().enumerate() {
        let w = c.weight().max(0.0);
        if roll < w {
            return i;
        }
        roll -= w;
    }
    configs.len() - 1
}

/// Which envelope slot a seed is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeSlot {
    Pattern = 1,
    Wind = 2,
    Event = 3,
}

/// RNG for the `counter`-th selection in a region's `slot`.
pub fn selection_rng(
    world_seed: u64,
    key: MapRegionKey,
    slot: EnvelopeSlot,
    counter: u64,
) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(mix_seed(&[
        world_seed,
        slot as u64,
        key.x as u32 as u64,
        key.z as u32 as u64,
        counter,
    ]))
}

/// Per-activation seed, stable for a given world seed, definition and region.
pub fn activation_seed(world_seed: u64, index: usize, key: MapRegionKey, counter: u64) -> u64 {
    mix_seed(&[
        world_seed,
        index as u64,
        key.x as u32 as u64,
        key.z as u32 as u64,
        counter,
    ])
}

/// Fold values into one well-mixed seed (splitmix64 per part).
pub fn mix_seed(parts: &[u64]) -> u64 {
    let mut h: u64 = 0x9E37_79B9_7F4A_7C15;
    for &p in parts {
        h = splitmix64(h ^ p);
    }
    h
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeatherPatternAssets;

    #[test]
    fn out_of_range_index_clamps_to_last_config() {
        let assets = WeatherPatternAssets::builtin();
        assert_eq!(assets.patterns.len(), 5);

        let mut state = EnvelopeState::initialize(&assets.patterns, 0, 1);
        state.index = 999;
        let config = state.config(&assets.patterns).unwrap();
        assert_eq!(config.code, assets.patterns[4].code);
        assert_eq!(clamp_index(999, 5), 4);
    }

    #[test]
    fn initialize_clamps_index_too() {
        let assets = WeatherPatternAssets::builtin();
        let state = EnvelopeState::initialize(&assets.patterns, 42, 7);
        assert_eq!(state.index, 4);
    }

    #[test]
    fn empty_definition_list_samples_default() {
        let patterns: Vec<crate::config::WeatherPatternConfig> = Vec::new();
        let state = EnvelopeState::initialize(&patterns, 3, 1);
        assert!(state.config(&patterns).is_none());
        assert_eq!(state.duration_secs, f32::MAX);
        let _ = state.sample(&patterns);
    }

    #[test]
    fn initialize_is_deterministic_per_seed() {
        let assets = WeatherPatternAssets::builtin();
        let a = EnvelopeState::initialize(&assets.patterns, 2, 12345);
        let b = EnvelopeState::initialize(&assets.patterns, 2, 12345);
        let c = EnvelopeState::initialize(&assets.patterns, 2, 54321);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rolled_duration_lies_in_configured_range() {
        let assets = WeatherPatternAssets::builtin();
        for seed in 0..100 {
            let s = EnvelopeState::initialize(&assets.patterns, 0, seed);
            let range = assets.patterns[0].duration_secs;
            assert!(s.duration_secs >= range.min && s.duration_secs <= range.max);
            assert!((0.0..=1.0).contains(&s.strength));
            assert!((0.0..TAU).contains(&s.phase));
        }
    }

    #[test]
    fn begin_use_resets_timer_but_keeps_roll() {
        let assets = WeatherPatternAssets::builtin();
        let mut s = EnvelopeState::initialize(&assets.patterns, 1, 99);
        let rolled = (s.strength, s.phase, s.duration_secs);
        s.advance(50.0);
        assert_eq!(s.elapsed_secs, 50.0);
        s.on_begin_use();
        assert_eq!(s.elapsed_secs, 0.0);
        assert_eq!((s.strength, s.phase, s.duration_secs), rolled);
    }

    #[test]
    fn expires_after_duration() {
        let mut s = EnvelopeState::placeholder();
        s.duration_secs = 10.0;
        s.advance(9.0);
        assert!(!s.expired());
        s.advance(1.0);
        assert!(s.expired());
        assert_eq!(s.progress(), 1.0);
    }

    #[test]
    fn negative_dt_does_not_rewind() {
        let mut s = EnvelopeState::placeholder();
        s.advance(5.0);
        s.advance(-3.0);
        assert_eq!(s.elapsed_secs, 5.0);
    }

    #[test]
    fn weighted_selection_follows_weights() {
        let mut assets = WeatherPatternAssets::builtin();
        for p in &mut assets.patterns {
            p.weight = 0.0;
        }
        assets.patterns[3].weight = 1.0;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(select_weighted(&assets.patterns, &mut rng), 3);
        }
    }

    #[test]
    fn weighted_selection_visits_every_positive_weight() {
        let assets = WeatherPatternAssets::builtin();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut seen = [false; 5];
        for _ in 0..2000 {
            seen[select_weighted(&assets.patterns, &mut rng)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn selection_rng_depends_on_every_input() {
        let key = MapRegionKey::new(3, 4);
        let base = selection_rng(1, key, EnvelopeSlot::Pattern, 0).next_u64();
        assert_eq!(base, selection_rng(1, key, EnvelopeSlot::Pattern, 0).next_u64());
        assert_ne!(base, selection_rng(2, key, EnvelopeSlot::Pattern, 0).next_u64());
        assert_ne!(base, selection_rng(1, MapRegionKey::new(4, 3), EnvelopeSlot::Pattern, 0).next_u64());
        assert_ne!(base, selection_rng(1, key, EnvelopeSlot::Wind, 0).next_u64());
        assert_ne!(base, selection_rng(1, key, EnvelopeSlot::Pattern, 1).next_u64());
    }

    #[test]
    fn intensity_stays_in_unit_range() {
        let mut s = EnvelopeState::placeholder();
        s.strength = 0.95;
        for i in 0..100 {
            s.elapsed_secs = i as f32 * 7.3;
            let v = s.intensity(0.5, 60.0);
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
