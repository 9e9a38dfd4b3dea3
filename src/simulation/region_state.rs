use serde::{Deserialize, Serialize};

use crate::config::WeatherPatternAssets;
use crate::simulation::composer::GlobalOverrides;
use crate::simulation::envelope::EnvelopeState;
use crate::simulation::pattern::{EventSample, PatternSample, WindSample};
use crate::world::MapRegionKey;

/// Weights this close to 1 commit the transition.
const COMMIT_EPSILON: f32 = 1e-4;

/// Weather carried by one region: the active pattern, the pattern it is
/// fading out of, and the wind and event envelopes.
///
/// Owned by exactly one writer: the server-side region, or the client sync
/// handler for a mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionWeatherState {
    pub old_pattern: EnvelopeState,
    pub new_pattern: EnvelopeState,
    /// 0 = all old, 1 = all new. Non-decreasing while transitioning.
    pub transition_weight: f32,
    pub transitioning: bool,
    pub transition_delay_secs: f32,
    pub wind: EnvelopeState,
    pub event: EnvelopeState,
    /// Bumped on every selection; feeds the region's selection RNG.
    pub selection_counter: u64,
}

/// Everything a region contributes to a snapshot, before any point data.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegionSample {
    pub pattern: PatternSample,
    pub wind: WindSample,
    pub event: EventSample,
}

/// Read access to region weather, implemented by the server's region table
/// and the client's mirrors.
pub trait RegionSource {
    /// `None` when the region is not loaded.
    fn region_state(&self, key: MapRegionKey) -> Option<&RegionWeatherState>;
    fn assets(&self) -> &WeatherPatternAssets;
    /// World clock in days; drives the cloud noise.
    fn total_days(&self) -> f64;
    fn overrides(&self) -> GlobalOverrides;
}

impl RegionWeatherState {
    pub fn settled(pattern: EnvelopeState, wind: EnvelopeState, event: EnvelopeState) -> Self {
        RegionWeatherState {
            old_pattern: pattern,
            new_pattern: pattern,
            transition_weight: 1.0,
            transitioning: false,
            transition_delay_secs: 0.0,
            wind,
            event,
            selection_counter: 0,
        }
    }

    /// Stand-in for regions that are not loaded: first definition of every
    /// kind, never expiring.
    pub fn dummy() -> Self {
        Self::settled(
            EnvelopeState::placeholder(),
            EnvelopeState::placeholder(),
            EnvelopeState::placeholder(),
        )
    }

    pub fn advance_timers(&mut self, dt: f32) {
        self.new_pattern.advance(dt);
        self.wind.advance(dt);
        self.event.advance(dt);
    }

    /// Move the cross-fade forward. Returns true when the transition
    /// committed during this call.
    pub fn advance_transition(&mut self, dt: f32) -> bool {
        if !self.transitioning {
            return false;
        }
        if self.transition_delay_secs <= 0.0 {
            self.snap_to_new();
            return true;
        }
        if dt > 0.0 {
            self.transition_weight =
                (self.transition_weight + dt / self.transition_delay_secs).min(1.0);
        }
        if self.transition_weight >= 1.0 - COMMIT_EPSILON {
            self.snap_to_new();
            return true;
        }
        false
    }

    /// Start fading from the current pattern into `next`.
    /// A non-positive delay commits immediately.
    pub fn begin_transition(&mut self, next: EnvelopeState, delay_secs: f32) {
        self.old_pattern = self.new_pattern;
        self.new_pattern = next;
        self.transition_weight = 0.0;
        self.transition_delay_secs = delay_secs;
        self.transitioning = true;
        if delay_secs <= 0.0 {
            self.snap_to_new();
        }
    }

    /// Discard the old pattern.
    pub fn snap_to_new(&mut self) {
        self.old_pattern = self.new_pattern;
        self.transition_weight = 1.0;
        self.transitioning = false;
    }

    /// Clamp fields that arrived from outside into their valid ranges.
    pub fn sanitize(&mut self) {
        if !self.transition_weight.is_finite() {
            self.transition_weight = 1.0;
        }
        self.transition_weight = self.transition_weight.clamp(0.0, 1.0);
        if !self.transitioning {
            self.snap_to_new();
        }
    }

    /// Old/new blended pattern plus wind and event samples.
    pub fn sample(&self, assets: &WeatherPatternAssets) -> RegionSample {
        let new = self.new_pattern.sample(&assets.patterns);
        let pattern = if self.transitioning {
            self.old_pattern
                .sample(&assets.patterns)
                .mix(&new, self.transition_weight)
        } else {
            new
        };
        RegionSample {
            pattern,
            wind: self.wind.sample(&assets.wind_patterns),
            event: self.event.sample(&assets.events),
        }
    }
}
