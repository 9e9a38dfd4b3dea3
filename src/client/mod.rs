pub mod connection;
pub mod reader;
pub mod sky_scan;
pub mod sync;

pub use connection::{ClientError, WeatherConnection};
pub use reader::WeatherDataReader;
pub use sky_scan::{SkyDistanceScanner, SkyExposure, SkyScanResult, distance_to_open_sky};
pub use sync::{SyncReport, WeatherInbox, WeatherSyncClient};

use glam::{DVec3, IVec3, Vec3};
use std::sync::Arc;
use tracing::info;

use crate::config::{SimulationConfig, WeatherPatternAssets};
use crate::simulation::snapshot::{PrecipitationState, WeatherDataSnapshot};
use crate::simulation::weather_world::{default_climate, world_sampler};

/// Everything a game client runs for weather: the update queue, the region
/// mirrors and the blending reader, ticked together in the right order.
pub struct ClientWeather {
    sync: WeatherSyncClient,
    reader: WeatherDataReader,
    sea_level: f64,
    sampler_seed: u64,
    sky: Option<(Arc<dyn SkyExposure>, i32)>,
    sky_scanner: SkyDistanceScanner,
    sky_distance: Option<SkyScanResult>,
}

impl ClientWeather {
    pub fn new(config: &SimulationConfig) -> (Self, WeatherInbox) {
        let (sync, inbox) =
            WeatherSyncClient::new(WeatherPatternAssets::builtin(), config.day_length_secs);
        let seed = config.world_seed;
        let sampler = world_sampler(seed, default_climate(seed, config.sea_level), config.sea_level);
        let reader = WeatherDataReader::new(config.region_grid(), sampler, config.snapshot_cache_ms);
        let weather = ClientWeather {
            sync,
            reader,
            sea_level: config.sea_level,
            sampler_seed: seed,
            sky: None,
            sky_scanner: SkyDistanceScanner::new(),
            sky_distance: None,
        };
        (weather, inbox)
    }

    /// Search for open sky around the observer every tick, out to
    /// `max_radius` blocks.
    pub fn set_sky_exposure(&mut self, world: Arc<dyn SkyExposure>, max_radius: i32) {
        self.sky = Some((world, max_radius.max(0)));
        self.sky_distance = None;
    }

    /// Latest finished open-sky search. Lags the observer by at least a tick.
    pub fn sky_distance(&self) -> Option<SkyScanResult> {
        self.sky_distance
    }

    /// One client tick: apply queued updates, then advance mirrors and the
    /// reader around `observer`.
    pub fn tick(&mut self, dt: f32, observer: DVec3) -> SyncReport {
        let report = self.sync.process_weather_updates();

        if let Some(seed) = self.sync.world_seed()
            && seed != self.sampler_seed
        {
            info!(seed, "Using server world seed for cloud noise");
            let sampler = world_sampler(seed, default_climate(seed, self.sea_level), self.sea_level);
            self.reader.set_sampler(sampler);
            self.sampler_seed = seed;
        }
        if report.changed_anything() {
            self.reader.invalidate();
        }

        self.sync.advance(dt);
        self.reader.load_adjacent_sims_and_lerp_values(observer);
        self.reader.update(&self.sync, dt);
        self.poll_sky_scan(observer);
        report
    }

    fn poll_sky_scan(&mut self, observer: DVec3) {
        let Some((world, max_radius)) = &self.sky else {
            return;
        };
        if let Some(result) = self.sky_scanner.take_result() {
            self.sky_distance = Some(result);
        }
        let origin = IVec3::new(
            observer.x.floor() as i32,
            observer.y.floor() as i32,
            observer.z.floor() as i32,
        );
        self.sky_scanner.request(Arc::clone(world), origin, *max_radius);
    }

    pub fn blended_weather_data(&mut self) -> WeatherDataSnapshot {
        self.reader.blended_weather_data(&self.sync)
    }

    pub fn get_precipitation(&self, position: DVec3, days: Option<f64>) -> f32 {
        self.reader.get_precipitation(&self.sync, position, days)
    }

    pub fn get_precipitation_state(&self, position: DVec3) -> PrecipitationState {
        self.reader.get_precipitation_state(&self.sync, position)
    }

    pub fn get_wind_speed_at(&self, position: DVec3) -> Vec3 {
        self.reader.get_wind_speed_at(position)
    }

    pub fn sync(&self) -> &WeatherSyncClient {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut WeatherSyncClient {
        &mut self.sync
    }

    pub fn reader(&self) -> &WeatherDataReader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut WeatherDataReader {
        &mut self.reader
    }
}
