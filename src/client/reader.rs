use glam::{DVec3, Vec3};

use crate::simulation::composer::{WindSmoother, altitude_wind_factor};
use crate::simulation::events::EventBus;
use crate::simulation::region_state::{RegionSource, RegionWeatherState};
use crate::simulation::snapshot::{
    PointSampler, PrecipitationState, WeatherDataSnapshot, blend, compose_region_snapshot,
};
use crate::world::{MapRegionKey, RegionGrid};

/// Blends the mirrored state of up to four regions into one snapshot for
/// the observer.
///
/// The reader never writes region state. Anything it cannot find resolves
/// to a shared dummy region, so queries always return weather.
pub struct WeatherDataReader {
    grid: RegionGrid,
    sampler: PointSampler,
    cache_window_ms: u64,
    /// Engine time in seconds. Sub-millisecond frames still accumulate.
    elapsed_secs: f64,
    position: DVec3,
    adjacent: Vec<(MapRegionKey, f32)>,
    cached: Option<(u64, WeatherDataSnapshot)>,
    dummy: RegionWeatherState,
    surface_wind: WindSmoother,
    altitude_wind: WindSmoother,
    listeners: EventBus<WeatherDataSnapshot>,
}

impl WeatherDataReader {
    pub fn new(grid: RegionGrid, sampler: PointSampler, cache_window_ms: u64) -> Self {
        WeatherDataReader {
            grid,
            sampler,
            cache_window_ms: cache_window_ms.max(1),
            elapsed_secs: 0.0,
            position: DVec3::ZERO,
            adjacent: Vec::new(),
            cached: None,
            dummy: RegionWeatherState::dummy(),
            surface_wind: WindSmoother::default(),
            altitude_wind: WindSmoother::default(),
            listeners: EventBus::new(),
        }
    }

    /// Swap the noise and climate source, e.g. once the server's seed is known.
    pub fn set_sampler(&mut self, sampler: PointSampler) {
        self.sampler = sampler;
        self.invalidate();
    }

    pub fn sampler(&self) -> &PointSampler {
        &self.sampler
    }

    pub fn grid(&self) -> RegionGrid {
        self.grid
    }

    /// Drop the cached snapshot so the next read recomputes.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.elapsed_secs * 1000.0) as u64
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    /// Listeners run in subscription order on every freshly blended snapshot
    /// and may adjust it.
    pub fn listeners(&mut self) -> &mut EventBus<WeatherDataSnapshot> {
        &mut self.listeners
    }

    /// Regions around the observer and their blend weights.
    pub fn adjacent(&self) -> &[(MapRegionKey, f32)] {
        &self.adjacent
    }

    /// Pick the regions around `position` and their bilinear weights.
    pub fn load_adjacent_sims_and_lerp_values(&mut self, position: DVec3) {
        self.position = position;
        self.adjacent = self.grid.bilinear_neighbours(position.x, position.z);
    }

    /// Sample every adjacent region at the observer and blend. Bypasses and
    /// refreshes the cache.
    pub fn update_adjacent_and_blend_weather_data<S: RegionSource>(
        &mut self,
        source: &S,
    ) -> WeatherDataSnapshot {
        if self.adjacent.is_empty() {
            self.load_adjacent_sims_and_lerp_values(self.position);
        }
        let mut snapshot =
            self.blend_at(source, &self.adjacent, self.position, source.total_days());
        self.listeners.dispatch(&mut snapshot);
        self.cached = Some((self.bucket(), snapshot));
        snapshot
    }

    /// Cached blended snapshot, recomputed at most once per cache window of
    /// elapsed time.
    pub fn blended_weather_data<S: RegionSource>(&mut self, source: &S) -> WeatherDataSnapshot {
        match self.cached {
            Some((bucket, snapshot)) if bucket == self.bucket() => snapshot,
            _ => self.update_adjacent_and_blend_weather_data(source),
        }
    }

    /// Advance engine time and the wind smoothers.
    pub fn update<S: RegionSource>(&mut self, source: &S, dt: f32) {
        if dt > 0.0 {
            self.elapsed_secs += f64::from(dt);
        }
        let snapshot = self.blended_weather_data(source);
        let surface = self
            .sampler
            .climate()
            .surface_height(self.position.x, self.position.z);
        self.surface_wind.update(snapshot.wind, dt);
        self.altitude_wind.update(
            snapshot.wind * altitude_wind_factor(self.position.y, surface),
            dt,
        );
    }

    /// Precipitation intensity at any point, never negative. `days` defaults
    /// to the current world clock.
    pub fn get_precipitation<S: RegionSource>(
        &self,
        source: &S,
        position: DVec3,
        days: Option<f64>,
    ) -> f32 {
        self.snapshot_at(source, position, days).precipitation.max(0.0)
    }

    pub fn get_precipitation_state<S: RegionSource>(
        &self,
        source: &S,
        position: DVec3,
    ) -> PrecipitationState {
        let mut state = self.snapshot_at(source, position, None).precipitation_state();
        state.level = state.level.max(0.0);
        state
    }

    /// Smoothed surface wind scaled for the height of `position` above its
    /// terrain.
    pub fn get_wind_speed_at(&self, position: DVec3) -> Vec3 {
        let surface = self.sampler.climate().surface_height(position.x, position.z);
        self.surface_wind.value() * altitude_wind_factor(position.y, surface)
    }

    /// Smoothed wind at the observer's own altitude.
    pub fn observer_wind(&self) -> Vec3 {
        self.altitude_wind.value()
    }

    /// Uncached, listener-free snapshot at an arbitrary point.
    pub fn snapshot_at<S: RegionSource>(
        &self,
        source: &S,
        position: DVec3,
        days: Option<f64>,
    ) -> WeatherDataSnapshot {
        let adjacent = self.grid.bilinear_neighbours(position.x, position.z);
        self.blend_at(
            source,
            &adjacent,
            position,
            days.unwrap_or_else(|| source.total_days()),
        )
    }

    fn blend_at<S: RegionSource>(
        &self,
        source: &S,
        adjacent: &[(MapRegionKey, f32)],
        position: DVec3,
        days: f64,
    ) -> WeatherDataSnapshot {
        let ctx = self.sampler.context(position, days, source.overrides());
        let assets = source.assets();
        let weighted: Vec<(f32, WeatherDataSnapshot)> = adjacent
            .iter()
            .map(|(key, w)| {
                let state = source.region_state(*key).unwrap_or(&self.dummy);
                (*w, compose_region_snapshot(&state.sample(assets), &ctx))
            })
            .collect();
        blend(&weighted)
    }

    fn bucket(&self) -> u64 {
        (self.elapsed_secs * 1000.0 / self.cache_window_ms as f64).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::sync::WeatherSyncClient;
    use crate::config::WeatherPatternAssets;
    use crate::server::protocol::ServerMessage;
    use crate::simulation::composer::CloudNoiseSource;
    use crate::simulation::envelope::EnvelopeState;
    use crate::simulation::events::Handling;
    use crate::world::{ClimateSample, UniformClimate};
    use std::sync::Arc;

    struct FixedNoise(f64, f64);

    impl CloudNoiseSource for FixedNoise {
        fn cover_and_gaps(&self, _x: f64, _z: f64, _days: f64) -> (f64, f64) {
            (self.0, self.1)
        }
    }

    const REGION: u32 = 512;

    fn grid() -> RegionGrid {
        RegionGrid::new(REGION * 4, REGION * 4, REGION)
    }

    fn sampler() -> PointSampler {
        PointSampler::new(
            Arc::new(FixedNoise(0.7, 0.2)),
            Arc::new(UniformClimate {
                climate: ClimateSample {
                    temperature: 15.0,
                    rainfall: 0.6,
                },
                surface_height: 120.0,
            }),
            110.0,
        )
    }

    fn reader() -> WeatherDataReader {
        WeatherDataReader::new(grid(), sampler(), 60)
    }

    fn state_on(assets: &WeatherPatternAssets, pattern: usize, wind: usize) -> RegionWeatherState {
        RegionWeatherState::settled(
            EnvelopeState::initialize(&assets.patterns, pattern, 21),
            EnvelopeState::initialize(&assets.wind_patterns, wind, 22),
            EnvelopeState::initialize(&assets.events, 0, 23),
        )
    }

    fn sync_with(regions: &[(MapRegionKey, RegionWeatherState)]) -> WeatherSyncClient {
        let (mut sync, inbox) = WeatherSyncClient::new(WeatherPatternAssets::builtin(), 2880.0);
        for (key, state) in regions {
            inbox.push(ServerMessage::WeatherState {
                region_x: key.x,
                region_z: key.z,
                update_instant: false,
                state: state.clone(),
            });
        }
        sync.process_weather_updates();
        sync
    }

    fn centre(key: MapRegionKey, y: f64) -> DVec3 {
        let (x, z) = key.center(REGION);
        DVec3::new(x, y, z)
    }

    #[test]
    fn region_centre_matches_unblended_snapshot() {
        let assets = WeatherPatternAssets::builtin();
        let key = MapRegionKey::new(1, 2);
        let state = state_on(&assets, 2, 1);
        let sync = sync_with(&[
            (key, state.clone()),
            (MapRegionKey::new(2, 2), state_on(&assets, 0, 0)),
            (MapRegionKey::new(1, 3), state_on(&assets, 4, 2)),
        ]);

        let mut reader = reader();
        let pos = centre(key, 130.0);
        reader.load_adjacent_sims_and_lerp_values(pos);
        assert_eq!(reader.adjacent()[0], (key, 1.0));
        assert!(reader.adjacent()[1..].iter().all(|(_, w)| *w == 0.0));

        let blended = reader.blended_weather_data(&sync);
        let ctx = reader.sampler().context(pos, sync.total_days(), sync.overrides());
        let own = compose_region_snapshot(&state.sample(&assets), &ctx);
        assert_eq!(blended, own);
    }

    #[test]
    fn midpoint_precipitation_is_the_mean() {
        let assets = WeatherPatternAssets::builtin();
        let a = MapRegionKey::new(1, 1);
        let b = MapRegionKey::new(2, 1);
        let sync = sync_with(&[(a, state_on(&assets, 2, 0)), (b, state_on(&assets, 0, 0))]);
        let reader = reader();

        let (ax, az) = a.center(REGION);
        let (bx, _) = b.center(REGION);
        let mid = DVec3::new((ax + bx) / 2.0, 120.0, az);

        let pa = reader.get_precipitation(&sync, centre(a, 120.0), None);
        let pb = reader.get_precipitation(&sync, centre(b, 120.0), None);
        let pm = reader.get_precipitation(&sync, mid, None);
        assert!(pa != pb, "regions should differ: {} vs {}", pa, pb);
        assert!((pm - (pa + pb) / 2.0).abs() < 1e-5, "{} vs mean of {} {}", pm, pa, pb);
    }

    #[test]
    fn precipitation_never_negative_anywhere() {
        let assets = WeatherPatternAssets::builtin();
        let sync = sync_with(&[
            (MapRegionKey::new(0, 0), state_on(&assets, 0, 0)),
            (MapRegionKey::new(3, 3), state_on(&assets, 4, 3)),
        ]);
        let reader = WeatherDataReader::new(
            grid(),
            crate::simulation::weather_world::world_sampler(
                7,
                Arc::new(UniformClimate {
                    climate: ClimateSample {
                        temperature: -5.0,
                        rainfall: 1.0,
                    },
                    surface_height: 100.0,
                }),
                110.0,
            ),
            60,
        );
        for x in [-5000.0, -1.0, 0.0, 300.0, 1024.0, 2047.9, 9000.0] {
            for z in [-300.0, 0.0, 777.0, 4000.0] {
                for days in [0.0, 0.37, 12.5, 1e4] {
                    let p = reader.get_precipitation(&sync, DVec3::new(x, 200.0, z), Some(days));
                    assert!(p >= 0.0 && p.is_finite());
                }
            }
        }
    }

    #[test]
    fn empty_mirrors_fall_back_to_dummy_region() {
        let sync = sync_with(&[]);
        let mut reader = reader();
        reader.load_adjacent_sims_and_lerp_values(DVec3::new(700.0, 120.0, 900.0));
        let snapshot = reader.blended_weather_data(&sync);

        let assets = WeatherPatternAssets::builtin();
        let ctx = reader
            .sampler()
            .context(reader.position(), sync.total_days(), sync.overrides());
        let dummy = compose_region_snapshot(&RegionWeatherState::dummy().sample(&assets), &ctx);
        assert!((snapshot.precipitation - dummy.precipitation).abs() < 1e-6);
        assert_eq!(snapshot.precipitation_type, dummy.precipitation_type);
    }

    #[test]
    fn instant_delta_matches_new_pattern_immediately() {
        let assets = WeatherPatternAssets::builtin();
        let key = MapRegionKey::new(0, 0);
        let mut transitioning = state_on(&assets, 0, 0);
        transitioning.begin_transition(EnvelopeState::initialize(&assets.patterns, 2, 40), 120.0);
        transitioning.advance_transition(10.0);

        let (mut sync, inbox) = WeatherSyncClient::new(assets.clone(), 2880.0);
        inbox.push(ServerMessage::WeatherState {
            region_x: 0,
            region_z: 0,
            update_instant: true,
            state: transitioning.clone(),
        });
        sync.process_weather_updates();

        let mut settled = transitioning.clone();
        settled.snap_to_new();
        let pos = centre(key, 125.0);
        let reader = reader();
        let ctx = reader.sampler().context(pos, sync.total_days(), sync.overrides());
        let expected = compose_region_snapshot(&settled.sample(&assets), &ctx);

        assert!(!sync.region_state(key).unwrap().transitioning);
        assert_eq!(reader.snapshot_at(&sync, pos, None), expected);
    }

    #[test]
    fn blended_data_is_cached_within_a_window() {
        let assets = WeatherPatternAssets::builtin();
        let key = MapRegionKey::new(1, 1);
        let (mut sync, inbox) = WeatherSyncClient::new(assets.clone(), 2880.0);
        inbox.push(ServerMessage::WeatherState {
            region_x: 1,
            region_z: 1,
            update_instant: true,
            state: state_on(&assets, 0, 0),
        });
        sync.process_weather_updates();

        let mut reader = reader();
        reader.load_adjacent_sims_and_lerp_values(centre(key, 120.0));
        let first = reader.blended_weather_data(&sync);

        inbox.push(ServerMessage::WeatherState {
            region_x: 1,
            region_z: 1,
            update_instant: true,
            state: state_on(&assets, 2, 0),
        });
        sync.process_weather_updates();

        reader.update(&sync, 0.02);
        assert_eq!(reader.blended_weather_data(&sync), first);

        reader.update(&sync, 0.05);
        assert_ne!(reader.blended_weather_data(&sync), first);
    }

    #[test]
    fn sub_millisecond_frames_still_expire_the_cache() {
        let assets = WeatherPatternAssets::builtin();
        let key = MapRegionKey::new(1, 1);
        let (mut sync, inbox) = WeatherSyncClient::new(assets.clone(), 2880.0);
        inbox.push(ServerMessage::WeatherState {
            region_x: 1,
            region_z: 1,
            update_instant: true,
            state: state_on(&assets, 0, 0),
        });
        sync.process_weather_updates();

        let mut reader = reader();
        reader.load_adjacent_sims_and_lerp_values(centre(key, 120.0));
        let first = reader.blended_weather_data(&sync);

        inbox.push(ServerMessage::WeatherState {
            region_x: 1,
            region_z: 1,
            update_instant: true,
            state: state_on(&assets, 2, 0),
        });
        sync.process_weather_updates();

        for _ in 0..2000 {
            reader.update(&sync, 0.0008);
        }
        assert!(reader.elapsed_ms() >= 1500, "clock at {} ms", reader.elapsed_ms());
        assert_ne!(reader.blended_weather_data(&sync), first);
    }

    #[test]
    fn engine_clock_keeps_frame_fractions() {
        let sync = sync_with(&[]);
        let mut reader = reader();
        for _ in 0..600 {
            reader.update(&sync, 1.0 / 60.0);
        }
        let ms = reader.elapsed_ms();
        assert!((9990..=10010).contains(&ms), "clock at {} ms", ms);
    }

    #[test]
    fn listeners_adjust_fresh_snapshots() {
        let sync = sync_with(&[]);
        let mut reader = reader();
        reader.listeners().subscribe(|s: &mut WeatherDataSnapshot| {
            s.ambient.fog_density = 0.9;
            Handling::PassThrough
        });
        reader.load_adjacent_sims_and_lerp_values(DVec3::new(100.0, 120.0, 100.0));
        assert_eq!(reader.blended_weather_data(&sync).ambient.fog_density, 0.9);
    }

    #[test]
    fn wind_grows_with_height_above_terrain() {
        let assets = WeatherPatternAssets::builtin();
        let key = MapRegionKey::new(0, 0);
        let sync = sync_with(&[(key, state_on(&assets, 0, 3))]);
        let mut reader = reader();
        reader.load_adjacent_sims_and_lerp_values(centre(key, 120.0));
        for _ in 0..40 {
            reader.update(&sync, 0.25);
        }

        let ground = reader.get_wind_speed_at(centre(key, 120.0));
        let high = reader.get_wind_speed_at(centre(key, 220.0));
        assert!(ground.length() > 0.0);
        assert!((high.length() - ground.length() * 2.0).abs() < 1e-3);
    }
}
