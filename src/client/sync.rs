use std::collections::HashMap;

use glam::DVec3;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::WeatherPatternAssets;
use crate::server::protocol::ServerMessage;
use crate::simulation::composer::GlobalOverrides;
use crate::simulation::events::LightningStrike;
use crate::simulation::region_state::{RegionSource, RegionWeatherState};
use crate::world::MapRegionKey;

/// Sending half of the client's update queue. Cloned into the network task;
/// nothing it receives touches weather state until the next
/// [`WeatherSyncClient::process_weather_updates`].
#[derive(Debug, Clone)]
pub struct WeatherInbox {
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl WeatherInbox {
    /// Returns false once the client side has been dropped.
    pub fn push(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn push_json(&self, text: &str) -> Result<bool, serde_json::Error> {
        Ok(self.push(ServerMessage::from_json(text)?))
    }
}

/// What one drain of the queue changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub instant_updates: usize,
    pub assets_replaced: bool,
}

impl SyncReport {
    pub fn changed_anything(&self) -> bool {
        self.applied > 0
    }
}

/// Client-side mirror of every region the server has told us about, plus
/// the global overrides, definitions and clock.
///
/// The only writer of mirrored region state on the client.
pub struct WeatherSyncClient {
    receiver: mpsc::UnboundedReceiver<ServerMessage>,
    mirrors: HashMap<u64, RegionWeatherState>,
    assets: WeatherPatternAssets,
    overrides: GlobalOverrides,
    total_days: f64,
    day_length_secs: f32,
    world_seed: Option<u64>,
    cloud_rebuild_requested: bool,
    flashes: Vec<LightningStrike>,
}

impl WeatherSyncClient {
    /// `assets` stands in until the server sends its own set.
    pub fn new(assets: WeatherPatternAssets, day_length_secs: f32) -> (Self, WeatherInbox) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let client = WeatherSyncClient {
            receiver,
            mirrors: HashMap::new(),
            assets,
            overrides: GlobalOverrides::default(),
            total_days: 0.0,
            day_length_secs,
            world_seed: None,
            cloud_rebuild_requested: false,
            flashes: Vec::new(),
        };
        (client, WeatherInbox { sender })
    }

    /// Drain the queue and apply everything in arrival order. Call once per
    /// client tick, before any snapshot is read.
    pub fn process_weather_updates(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        while let Ok(message) = self.receiver.try_recv() {
            self.apply(message, &mut report);
            report.applied += 1;
        }
        if report.applied > 0 {
            debug!(
                applied = report.applied,
                instant = report.instant_updates,
                mirrors = self.mirrors.len(),
                "Applied weather updates"
            );
        }
        report
    }

    fn apply(&mut self, message: ServerMessage, report: &mut SyncReport) {
        match message {
            ServerMessage::WeatherState {
                region_x,
                region_z,
                update_instant,
                state,
            } => {
                let key = MapRegionKey::new(region_x, region_z);
                self.apply_region_state(key, state, update_instant);
                if update_instant {
                    report.instant_updates += 1;
                }
            }
            ServerMessage::WeatherConfig {
                override_precipitation,
                rain_cloud_days_offset,
            } => {
                self.overrides.override_precipitation =
                    override_precipitation.filter(|v| v.is_finite());
                if rain_cloud_days_offset.is_finite() {
                    self.overrides.rain_cloud_days_offset = rain_cloud_days_offset;
                }
            }
            ServerMessage::WeatherCloudYpos { cloud_level_rel } => {
                if cloud_level_rel.is_finite() {
                    self.overrides.cloud_level_rel = cloud_level_rel;
                }
            }
            ServerMessage::WeatherPatternAssets { assets } => match assets.validate() {
                Ok(()) => {
                    self.assets = assets;
                    report.assets_replaced = true;
                }
                Err(e) => warn!("Ignoring invalid weather pattern assets from server: {}", e),
            },
            ServerMessage::LightningFlash {
                region_x,
                region_z,
                x,
                y,
                z,
                seed,
            } => self.flashes.push(LightningStrike {
                region: MapRegionKey::new(region_x, region_z),
                position: DVec3::new(x, y, z),
                seed,
            }),
            ServerMessage::WorldClock {
                total_days,
                day_length_secs,
                world_seed,
            } => {
                if total_days.is_finite() && total_days >= 0.0 {
                    self.total_days = total_days;
                }
                if day_length_secs > 0.0 {
                    self.day_length_secs = day_length_secs;
                }
                self.world_seed = Some(world_seed);
            }
        }
    }

    /// Overwrite a mirror with the server's state. Unknown regions get a
    /// mirror on first contact. An instant update snaps to the new pattern
    /// and asks renderers to rebuild instead of fading; so does a region
    /// seen for the first time.
    pub fn apply_region_state(
        &mut self,
        key: MapRegionKey,
        mut state: RegionWeatherState,
        update_instant: bool,
    ) {
        state.sanitize();
        // Envelope timers stay as the server sent them so both sides sample alike
        if update_instant {
            state.snap_to_new();
        }
        let first_contact = self.mirrors.insert(key.index(), state).is_none();
        if update_instant || first_contact {
            self.cloud_rebuild_requested = true;
        }
    }

    /// Run mirrors forward between server updates so fades progress locally.
    pub fn advance(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        for state in self.mirrors.values_mut() {
            state.advance_timers(dt);
            state.advance_transition(dt);
        }
        self.total_days += f64::from(dt) / f64::from(self.day_length_secs);
    }

    /// True once after any instant update.
    pub fn take_cloud_rebuild_request(&mut self) -> bool {
        std::mem::take(&mut self.cloud_rebuild_requested)
    }

    pub fn drain_lightning_flashes(&mut self) -> Vec<LightningStrike> {
        std::mem::take(&mut self.flashes)
    }

    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    pub fn world_seed(&self) -> Option<u64> {
        self.world_seed
    }

    pub fn day_length_secs(&self) -> f32 {
        self.day_length_secs
    }
}

impl RegionSource for WeatherSyncClient {
    fn region_state(&self, key: MapRegionKey) -> Option<&RegionWeatherState> {
        self.mirrors.get(&key.index())
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
