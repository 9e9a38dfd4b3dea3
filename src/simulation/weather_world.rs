use glam::DVec3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AssetError, SimulationConfig, WeatherPatternAssets};
use crate::persistence::{RegionStore, StoreError, WorldMetadata, unix_timestamp_now};
use crate::simulation::composer::GlobalOverrides;
use crate::simulation::envelope::mix_seed;
use crate::simulation::events::{EventBus, LightningStrike};
use crate::simulation::noise_field::PrecipitationNoise;
use crate::simulation::region::{RegionTiming, WeatherSimulationRegion};
use crate::simulation::region_state::{RegionSource, RegionWeatherState};
use crate::simulation::snapshot::{PointSampler, compose_region_snapshot};
use crate::world::{ClimateProvider, MapRegionKey, NoiseClimate, RegionGrid};

/// Fixed parameters of a running weather world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherWorldSettings {
    pub world_seed: u64,
    pub grid: RegionGrid,
    pub sea_level: f64,
    pub day_length_secs: f32,
    pub timing: RegionTiming,
}

impl WeatherWorldSettings {
    pub fn from_config(config: &SimulationConfig, world_seed: u64) -> Self {
        WeatherWorldSettings {
            world_seed,
            grid: config.region_grid(),
            sea_level: config.sea_level,
            day_length_secs: config.day_length_secs,
            timing: RegionTiming {
                transition_secs: config.transition_secs,
                resync_interval_secs: config.resync_interval_secs,
            },
        }
    }
}

/// One region's state as pushed to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDelta {
    pub key: MapRegionKey,
    pub state: RegionWeatherState,
    /// Client should snap instead of fading.
    pub update_instant: bool,
}

#[derive(Debug, Default)]
pub struct TickOutput {
    pub deltas: Vec<RegionDelta>,
    pub flashes: Vec<LightningStrike>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorldCommandError {
    #[error("no weather pattern with code '{0}'")]
    UnknownPattern(String),
    #[error("region {0} is outside the map")]
    OutsideMap(MapRegionKey),
    #[error(transparent)]
    Assets(#[from] AssetError),
}

/// Owns every loaded region plus the world clock and global overrides.
/// Passed explicitly to the tick loop and command handlers.
pub struct WeatherWorld {
    id: Uuid,
    settings: WeatherWorldSettings,
    assets: WeatherPatternAssets,
    regions: HashMap<u64, WeatherSimulationRegion>,
    store: Option<RegionStore>,
    sampler: PointSampler,
    total_days: f64,
    tick_count: u64,
    overrides: GlobalOverrides,
    lightning_impact: EventBus<LightningStrike>,
    strike_rng: ChaCha8Rng,
    pending: Vec<RegionDelta>,
}

/// Noise climate for a world seed, the default when no world generator
/// supplies one.
pub fn default_climate(world_seed: u64, sea_level: f64) -> Arc<dyn ClimateProvider> {
    Arc::new(NoiseClimate::new(world_seed, sea_level))
}

/// Cloud noise and climate for a world seed; shared by server and clients.
pub fn world_sampler(
    world_seed: u64,
    climate: Arc<dyn ClimateProvider>,
    sea_level: f64,
) -> PointSampler {
    PointSampler::new(Arc::new(PrecipitationNoise::new(world_seed)), climate, sea_level)
}

impl WeatherWorld {
    pub fn new(
        settings: WeatherWorldSettings,
        assets: WeatherPatternAssets,
        climate: Arc<dyn ClimateProvider>,
        store: Option<RegionStore>,
    ) -> Self {
        WeatherWorld {
            id: Uuid::new_v4(),
            sampler: world_sampler(settings.world_seed, climate, settings.sea_level),
            strike_rng: ChaCha8Rng::seed_from_u64(mix_seed(&[settings.world_seed, 0x1167])),
            settings,
            assets,
            regions: HashMap::new(),
            store,
            total_days: 0.0,
            tick_count: 0,
            overrides: GlobalOverrides::default(),
            lightning_impact: EventBus::new(),
            pending: Vec::new(),
        }
    }

    /// Resume clock and overrides from a previous run.
    pub fn restore(&mut self, metadata: &WorldMetadata) {
        if metadata.world_seed != self.settings.world_seed {
            warn!(
                saved = metadata.world_seed,
                configured = self.settings.world_seed,
                "Saved world seed differs from configured seed"
            );
        }
        self.id = metadata.id;
        self.total_days = metadata.total_days;
        self.tick_count = metadata.tick_count;
        self.overrides = metadata.overrides;
    }

    pub fn metadata(&self) -> WorldMetadata {
        WorldMetadata {
            id: self.id,
            world_seed: self.settings.world_seed,
            total_days: self.total_days,
            tick_count: self.tick_count,
            overrides: self.overrides,
            saved_at: unix_timestamp_now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &WeatherWorldSettings {
        &self.settings
    }

    pub fn sampler(&self) -> &PointSampler {
        &self.sampler
    }

    pub fn total_days(&self) -> f64 {
        self.total_days
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn overrides(&self) -> GlobalOverrides {
        self.overrides
    }

    pub fn loaded_region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn region(&self, key: MapRegionKey) -> Option<&WeatherSimulationRegion> {
        self.regions.get(&key.index())
    }

    /// Listeners may cancel the flash broadcast with `PreventDefault`.
    pub fn lightning_impact(&mut self) -> &mut EventBus<LightningStrike> {
        &mut self.lightning_impact
    }

    /// Load or create the region. `None` for keys off the map.
    pub fn ensure_region(&mut self, key: MapRegionKey) -> Option<&mut WeatherSimulationRegion> {
        if !self.settings.grid.contains(key) {
            return None;
        }
        let region = self.regions.entry(key.index()).or_insert_with(|| {
            let blob = match &self.store {
                Some(store) => match store.load_region(key) {
                    Ok(blob) => blob,
                    Err(e) => {
                        warn!(region = %key, error = %e, "Cannot read region blob");
                        None
                    }
                },
                None => None,
            };
            debug!(region = %key, persisted = blob.is_some(), "Loading region weather");
            WeatherSimulationRegion::from_blob_or_random(
                key,
                self.settings.world_seed,
                blob.as_deref(),
                &self.assets,
            )
        });
        Some(region)
    }

    pub fn load_all(&mut self) {
        let keys: Vec<MapRegionKey> = self.settings.grid.keys().collect();
        for key in keys {
            self.ensure_region(key);
        }
        info!(regions = self.regions.len(), "Region weather loaded");
    }

    /// Evict a region, writing it out first if it changed.
    pub fn unload_region(&mut self, key: MapRegionKey) -> Result<bool, StoreError> {
        let Some(mut region) = self.regions.remove(&key.index()) else {
            return Ok(false);
        };
        if region.is_dirty() {
            self.save_region(&mut region)?;
        }
        Ok(true)
    }

    fn save_region(&self, region: &mut WeatherSimulationRegion) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let blob = region.serialize().map_err(|e| StoreError::Encode {
            what: "region state",
            message: e.to_string(),
        })?;
        store.save_region(region.key(), &blob)?;
        region.mark_clean();
        Ok(())
    }

    /// Write every dirty region and the world metadata. Returns how many
    /// regions were written.
    pub fn flush_dirty(&mut self) -> Result<usize, StoreError> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };
        let mut written = 0;
        for region in self.regions.values_mut().filter(|r| r.is_dirty()) {
            let blob = region.serialize().map_err(|e| StoreError::Encode {
                what: "region state",
                message: e.to_string(),
            })?;
            store.save_region(region.key(), &blob)?;
            region.mark_clean();
            written += 1;
        }
        store.save_metadata(&self.metadata())?;
        Ok(written)
    }

    /// Advance the clock and every loaded region by `dt` seconds.
    pub fn tick(&mut self, dt: f32) -> TickOutput {
        let mut output = TickOutput {
            deltas: std::mem::take(&mut self.pending),
            flashes: Vec::new(),
        };
        if dt > 0.0 {
            self.total_days += f64::from(dt) / f64::from(self.settings.day_length_secs);
        }
        self.tick_count += 1;

        let mut keys: Vec<u64> = self.regions.keys().copied().collect();
        keys.sort_unstable();

        for index in keys {
            let Some(region) = self.regions.get_mut(&index) else {
                continue;
            };
            let changes = region.tick(dt, &self.assets, self.settings.timing);
            if changes.is_worth_sending() {
                output.deltas.push(RegionDelta {
                    key: region.key(),
                    state: region.state().clone(),
                    update_instant: false,
                });
            }
            if let Some(strike) = self.roll_lightning(MapRegionKey::from_index(index), dt) {
                output.flashes.push(strike);
            }
        }
        output
    }

    /// Rolls a strike for a region whose event carries lightning and whose
    /// centre is currently precipitating.
    fn roll_lightning(&mut self, key: MapRegionKey, dt: f32) -> Option<LightningStrike> {
        let region = self.regions.get(&key.index())?;
        let sample = region.state().sample(&self.assets);
        if sample.event.lightning_rate <= 0.0 || dt <= 0.0 {
            return None;
        }

        let size = f64::from(self.settings.grid.region_size);
        let (cx, cz) = key.center(self.settings.grid.region_size);
        let surface = self.sampler.climate().surface_height(cx, cz);
        let ctx = self
            .sampler
            .context(DVec3::new(cx, surface, cz), self.total_days, self.overrides);
        let rate_per_min = compose_region_snapshot(&sample, &ctx).lightning_rate;
        let chance = f64::from(rate_per_min) * f64::from(dt) / 60.0;
        if chance <= 0.0 || self.strike_rng.r#gen::<f64>() >= chance {
            return None;
        }

        let x = cx + (self.strike_rng.r#gen::<f64>() - 0.5) * size;
        let z = cz + (self.strike_rng.r#gen::<f64>() - 0.5) * size;
        let mut strike = LightningStrike {
            region: key,
            position: DVec3::new(x, self.sampler.climate().surface_height(x, z), z),
            seed: self.strike_rng.next_u64(),
        };
        let outcome = self.lightning_impact.dispatch(&mut strike);
        if outcome.default_prevented {
            debug!(region = %key, "Lightning flash suppressed by listener");
            return None;
        }
        Some(strike)
    }

    /// Switch a region to the pattern named `code`.
    pub fn set_pattern(
        &mut self,
        key: MapRegionKey,
        code: &str,
        instant: bool,
    ) -> Result<(), WorldCommandError> {
        let index = self
            .assets
            .pattern_index(code)
            .ok_or_else(|| WorldCommandError::UnknownPattern(code.to_string()))?;
        let transition_secs = self.settings.timing.transition_secs;
        let assets = self.assets.clone();
        let region = self
            .ensure_region(key)
            .ok_or(WorldCommandError::OutsideMap(key))?;
        region.force_pattern(&assets, index, instant, transition_secs);
        let delta = RegionDelta {
            key,
            state: region.state().clone(),
            update_instant: instant,
        };
        info!(region = %key, pattern = code, instant, "Weather pattern set by command");
        self.pending.push(delta);
        Ok(())
    }

    pub fn set_precipitation_override(&mut self, value: Option<f32>) {
        self.overrides.override_precipitation = value.filter(|v| v.is_finite());
    }

    pub fn set_rain_cloud_days_offset(&mut self, days: f64) {
        if days.is_finite() {
            self.overrides.rain_cloud_days_offset = days;
        }
    }

    pub fn set_cloud_level(&mut self, level: f32) {
        if level.is_finite() {
            self.overrides.cloud_level_rel = level;
        }
    }

    pub fn assets(&self) -> &WeatherPatternAssets {
        &self.assets
    }

    /// Swap in a new definition set. Existing indices stay as they are and
    /// resolve by clamping; every region is resent.
    pub fn replace_assets(&mut self, assets: WeatherPatternAssets) -> Result<(), AssetError> {
        assets.validate()?;
        self.assets = assets;
        let deltas: Vec<RegionDelta> = self.state_deltas();
        self.pending.extend(deltas);
        info!(
            patterns = self.assets.patterns.len(),
            winds = self.assets.wind_patterns.len(),
            events = self.assets.events.len(),
            "Weather pattern assets replaced"
        );
        Ok(())
    }

    /// Every loaded region as a plain delta, sorted by key. Mirrors copy it
    /// as is, so fades in progress carry on where the server has them.
    pub fn state_deltas(&self) -> Vec<RegionDelta> {
        let mut deltas: Vec<RegionDelta> = self
            .regions
            .values()
            .map(|r| RegionDelta {
                key: r.key(),
                state: r.state().clone(),
                update_instant: false,
            })
            .collect();
        deltas.sort_by_key(|d| d.key);
        deltas
    }
}

impl RegionSource for WeatherWorld {
    fn region_state(&self, key: MapRegionKey) -> Option<&RegionWeatherState> {
        self.regions.get(&key.index()).map(|r| r.state())
    }

    fn assets(&self) -> &WeatherPatternAssets {
        &self.assets
    }

    fn total_days(&self) -> f64 {
        self.total_days
    }

    fn overrides(&self) -> GlobalOverrides {
        self.overrides
    }
}
