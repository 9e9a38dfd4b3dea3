use tracing::{debug, warn};

use crate::config::WeatherPatternAssets;
use crate::simulation::envelope::{
    activation_seed, select_weighted, selection_rng, EnvelopeConfig, EnvelopeSlot, EnvelopeState,
};
use crate::simulation::region_state::RegionWeatherState;
use crate::world::MapRegionKey;

/// Leading byte of every persisted region blob.
pub const REGION_BLOB_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RegionStateError {
    #[error("region blob is empty")]
    Missing,
    #[error("unsupported region blob version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt region blob: {0}")]
    Corrupt(String),
    #[error("cannot encode region state: {0}")]
    Encode(String),
}

/// Timing knobs a region needs while ticking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionTiming {
    pub transition_secs: f32,
    pub resync_interval_secs: f32,
}

/// What changed during one region tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionChanges {
    pub pattern_selected: bool,
    pub transition_completed: bool,
    pub wind_rerolled: bool,
    pub event_rerolled: bool,
    pub resync_due: bool,
}

impl RegionChanges {
    pub fn is_worth_sending(&self) -> bool {
        self.pattern_selected
            || self.transition_completed
            || self.wind_rerolled
            || self.event_rerolled
            || self.resync_due
    }
}

/// Server-authoritative weather for one map region.
#[derive(Debug, Clone)]
pub struct WeatherSimulationRegion {
    key: MapRegionKey,
    world_seed: u64,
    state: RegionWeatherState,
    dirty: bool,
    since_sync_secs: f32,
}

impl WeatherSimulationRegion {
    /// Fresh region with randomly selected pattern, wind and event.
    pub fn new_random(key: MapRegionKey, world_seed: u64, assets: &WeatherPatternAssets) -> Self {
        let mut region = WeatherSimulationRegion {
            key,
            world_seed,
            state: RegionWeatherState::dummy(),
            dirty: true,
            since_sync_secs: 0.0,
        };
        let pattern = region.roll(&assets.patterns, EnvelopeSlot::Pattern);
        let wind = region.roll(&assets.wind_patterns, EnvelopeSlot::Wind);
        let event = region.roll(&assets.events, EnvelopeSlot::Event);
        region.state = RegionWeatherState::settled(pattern, wind, event);
        region.state.selection_counter = 1;
        region
    }

    /// Restore from a persisted blob. An unreadable blob is logged and
    /// replaced by a fresh random region.
    pub fn from_blob_or_random(
        key: MapRegionKey,
        world_seed: u64,
        blob: Option<&[u8]>,
        assets: &WeatherPatternAssets,
    ) -> Self {
        let Some(bytes) = blob else {
            return Self::new_random(key, world_seed, assets);
        };
        match Self::deserialize(bytes) {
            Ok(state) => Self::from_state(key, world_seed, state),
            Err(e) => {
                warn!(region = %key, error = %e, "Discarding unreadable region weather");
                Self::new_random(key, world_seed, assets)
            }
        }
    }

    pub fn from_state(key: MapRegionKey, world_seed: u64, state: RegionWeatherState) -> Self {
        WeatherSimulationRegion {
            key,
            world_seed,
            state,
            dirty: false,
            since_sync_secs: 0.0,
        }
    }

    pub fn key(&self) -> MapRegionKey {
        self.key
    }

    pub fn state(&self) -> &RegionWeatherState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Advance timers and the cross-fade, then re-roll whatever expired.
    pub fn tick(
        &mut self,
        dt: f32,
        assets: &WeatherPatternAssets,
        timing: RegionTiming,
    ) -> RegionChanges {
        let mut changes = RegionChanges::default();

        self.state.advance_timers(dt);
        changes.transition_completed = self.state.advance_transition(dt);
        changes.pattern_selected =
            self.maybe_select_next_pattern(assets, false, timing.transition_secs);

        if self.state.wind.expired() {
            self.state.wind = self.roll(&assets.wind_patterns, EnvelopeSlot::Wind);
            self.state.selection_counter += 1;
            changes.wind_rerolled = true;
        }
        if self.state.event.expired() {
            self.state.event = self.roll(&assets.events, EnvelopeSlot::Event);
            self.state.selection_counter += 1;
            changes.event_rerolled = true;
        }

        self.since_sync_secs += dt.max(0.0);
        if changes.is_worth_sending() {
            self.dirty = true;
            self.since_sync_secs = 0.0;
        } else if self.since_sync_secs >= timing.resync_interval_secs {
            changes.resync_due = true;
            self.since_sync_secs = 0.0;
        }
        changes
    }

    /// Pick the next pattern when the active one has run its course (or
    /// when forced) and start fading into it.
    pub fn maybe_select_next_pattern(
        &mut self,
        assets: &WeatherPatternAssets,
        force: bool,
        transition_secs: f32,
    ) -> bool {
        if !force && !self.state.new_pattern.expired() {
            return false;
        }
        let next = self.roll(&assets.patterns, EnvelopeSlot::Pattern);
        debug!(
            region = %self.key,
            pattern = next.config(&assets.patterns).map(|c| c.code.as_str()).unwrap_or("?"),
            "Selected next weather pattern"
        );
        self.state.selection_counter += 1;
        self.state.begin_transition(next, transition_secs);
        self.dirty = true;
        true
    }

    /// Switch to a specific pattern, either instantly or with the usual fade.
    pub fn force_pattern(
        &mut self,
        assets: &WeatherPatternAssets,
        index: usize,
        instant: bool,
        transition_secs: f32,
    ) {
        let counter = self.state.selection_counter;
        let seed = activation_seed(
            self.world_seed,
            index,
            self.key,
            slot_counter(counter, EnvelopeSlot::Pattern),
        );
        let mut next = EnvelopeState::initialize(&assets.patterns, index, seed);
        next.on_begin_use();
        self.state.selection_counter += 1;
        self.state
            .begin_transition(next, if instant { 0.0 } else { transition_secs });
        self.dirty = true;
        self.since_sync_secs = 0.0;
    }

    fn roll<C: EnvelopeConfig>(&self, configs: &[C], slot: EnvelopeSlot) -> EnvelopeState {
        let counter = self.state.selection_counter;
        let mut rng = selection_rng(self.world_seed, self.key, slot, counter);
        let index = select_weighted(configs, &mut rng);
        let seed = activation_seed(self.world_seed, index, self.key, slot_counter(counter, slot));
        let mut envelope = EnvelopeState::initialize(configs, index, seed);
        envelope.on_begin_use();
        envelope
    }

    /// `[version][bincode(RegionWeatherState)]`
    pub fn serialize(&self) -> Result<Vec<u8>, RegionStateError> {
        let body =
            bincode::serialize(&self.state).map_err(|e| RegionStateError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(REGION_BLOB_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<RegionWeatherState, RegionStateError> {
        let (&version, body) = bytes.split_first().ok_or(RegionStateError::Missing)?;
        if version != REGION_BLOB_VERSION {
            return Err(RegionStateError::UnsupportedVersion(version));
        }
        let state: RegionWeatherState =
            bincode::deserialize(body).map_err(|e| RegionStateError::Corrupt(e.to_string()))?;
        if !state.transition_weight.is_finite() || !(0.0..=1.0).contains(&state.transition_weight)
        {
            return Err(RegionStateError::Corrupt(format!(
                "transition weight {} outside [0, 1]",
                state.transition_weight
            )));
        }
        Ok(state)
    }
}

/// Keeps activation seeds distinct across slots that share a counter.
fn slot_counter(counter: u64, slot: EnvelopeSlot) -> u64 {
    (counter << 2) | slot as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMING: RegionTiming = RegionTiming {
        transition_secs: 20.0,
        resync_interval_secs: 30.0,
    };

    fn assets() -> WeatherPatternAssets {
        WeatherPatternAssets::builtin()
    }

    #[test]
    fn same_seed_and_key_select_same_weather() {
        let assets = assets();
        let a = WeatherSimulationRegion::new_random(MapRegionKey::new(2, 5), 77, &assets);
        let b = WeatherSimulationRegion::new_random(MapRegionKey::new(2, 5), 77, &assets);
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn serialize_round_trip_is_exact() {
        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(-1, 3), 9, &assets);
        region.force_pattern(&assets, 2, false, 40.0);
        region.tick(7.5, &assets, TIMING);

        let bytes = region.serialize().unwrap();
        assert_eq!(bytes[0], REGION_BLOB_VERSION);
        let state = WeatherSimulationRegion::deserialize(&bytes).unwrap();
        assert_eq!(&state, region.state());

        let restored = WeatherSimulationRegion::from_state(region.key(), 9, state);
        assert_eq!(restored.serialize().unwrap(), bytes);
        assert_eq!(restored.state().sample(&assets), region.state().sample(&assets));
    }

    #[test]
    fn corrupt_blob_falls_back_to_random() {
        let assets = assets();
        let key = MapRegionKey::new(0, 0);
        let region =
            WeatherSimulationRegion::from_blob_or_random(key, 1, Some(&[1, 0xFF, 0x02]), &assets);
        let fresh = WeatherSimulationRegion::new_random(key, 1, &assets);
        assert_eq!(region.state(), fresh.state());
        assert!(region.is_dirty());
    }

    #[test]
    fn deserialize_rejects_bad_inputs() {
        assert!(matches!(
            WeatherSimulationRegion::deserialize(&[]),
            Err(RegionStateError::Missing)
        ));
        assert!(matches!(
            WeatherSimulationRegion::deserialize(&[9, 1, 2, 3]),
            Err(RegionStateError::UnsupportedVersion(9))
        ));

        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(1, 1), 3, &assets);
        region.state.transition_weight = 4.0;
        let bytes = region.serialize().unwrap();
        assert!(matches!(
            WeatherSimulationRegion::deserialize(&bytes),
            Err(RegionStateError::Corrupt(_))
        ));
    }

    #[test]
    fn expired_pattern_starts_a_transition() {
        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(4, 4), 5, &assets);
        region.mark_clean();
        let duration = region.state().new_pattern.duration_secs;
        let counter = region.state().selection_counter;

        let changes = region.tick(duration + 1.0, &assets, TIMING);
        assert!(changes.pattern_selected);
        assert!(changes.is_worth_sending());
        assert!(region.state().transitioning);
        assert_eq!(region.state().transition_weight, 0.0);
        assert!(region.state().selection_counter > counter);
        assert!(region.is_dirty());
    }

    #[test]
    fn transition_completes_through_ticks() {
        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(0, 1), 5, &assets);
        region.force_pattern(&assets, 3, false, 2.0);
        assert!(region.state().transitioning);

        let mut completed = false;
        for _ in 0..8 {
            completed |= region.tick(0.25, &assets, TIMING).transition_completed;
        }
        assert!(completed);
        assert!(!region.state().transitioning);
        assert_eq!(region.state().new_pattern.index, 3);
    }

    #[test]
    fn instant_force_skips_the_fade() {
        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(0, 1), 5, &assets);
        region.force_pattern(&assets, 4, true, 30.0);
        assert!(!region.state().transitioning);
        assert_eq!(region.state().new_pattern.index, 4);
        assert_eq!(region.state().new_pattern.elapsed_secs, 0.0);
    }

    #[test]
    fn quiet_region_requests_periodic_resync() {
        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(0, 1), 5, &assets);
        let mut resyncs = 0;
        for _ in 0..16 {
            let changes = region.tick(5.0, &assets, TIMING);
            if changes.resync_due {
                resyncs += 1;
            }
        }
        assert!(resyncs >= 1);
    }

    #[test]
    fn wind_rerolls_when_expired() {
        let assets = assets();
        let mut region = WeatherSimulationRegion::new_random(MapRegionKey::new(6, 2), 5, &assets);
        let wind_duration = region.state().wind.duration_secs;
        let changes = region.tick(wind_duration + 0.5, &assets, TIMING);
        assert!(changes.wind_rerolled);
        assert_eq!(region.state().wind.elapsed_secs, 0.0);
    }
}
