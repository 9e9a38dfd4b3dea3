use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec3;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ClientWeather, WeatherConnection, WeatherDataReader};
use crate::config::{SimulationConfig, WeatherPatternAssets};
use crate::persistence::RegionStore;
use crate::server::protocol::{AdminCommand, ServerMessage};
use crate::server::{self, ServerState, TickReport};
use crate::simulation::envelope::{EnvelopeConfig, EnvelopeState};
use crate::simulation::region::WeatherSimulationRegion;
use crate::simulation::snapshot::WeatherDataSnapshot;
use crate::simulation::weather_world::{WeatherWorld, WeatherWorldSettings, default_climate};
use crate::world::MapRegionKey;

/// Assets from the configured file. A missing or invalid file is fatal.
fn load_assets(config: &SimulationConfig) -> Result<WeatherPatternAssets, String> {
    WeatherPatternAssets::from_file(Path::new(&config.patterns_file))
        .map_err(|e| format!("Failed to load weather patterns: {}", e))
}

/// Run the weather server: restore regions, start WebSocket server, run tick loop.
pub async fn run_server(config: &SimulationConfig) -> Result<(), String> {
    // 1. Definitions and saved state
    let assets = load_assets(config)?;
    info!(
        path = %config.patterns_file,
        patterns = assets.patterns.len(),
        winds = assets.wind_patterns.len(),
        events = assets.events.len(),
        "Weather patterns loaded"
    );

    let store = RegionStore::open(&config.save_directory)
        .map_err(|e| format!("Cannot open save directory {}: {}", config.save_directory, e))?;
    let metadata = match store.load_metadata() {
        Ok(m) => m,
        Err(e) => {
            warn!("Ignoring unreadable world metadata, starting a fresh clock: {}", e);
            None
        }
    };

    let world_seed = match (&metadata, config.world_seed) {
        (Some(m), _) => m.world_seed,
        (None, 0) => rand::random::<u64>(),
        (None, seed) => seed,
    };

    // 2. World context
    let settings = WeatherWorldSettings::from_config(config, world_seed);
    let mut world = WeatherWorld::new(
        settings,
        assets,
        default_climate(world_seed, config.sea_level),
        Some(store),
    );
    if let Some(m) = &metadata {
        world.restore(m);
    }
    world.load_all();
    match world.flush_dirty() {
        Ok(n) => debug!(written = n, "Initial region flush"),
        Err(e) => warn!("Initial region flush failed: {}", e),
    }

    info!(
        world = %world.id(),
        seed = world_seed,
        regions = world.loaded_region_count(),
        total_days = world.total_days(),
        "Weather world ready"
    );

    // 3. Server state and admin command queue
    let (admin_tx, mut admin_rx) = mpsc::unbounded_channel::<AdminCommand>();
    let state = Arc::new(
        ServerState::new(server::build_join_messages(&world), admin_tx)
            .with_admin_token(config.admin_token.clone()),
    );
    if config.admin_token.is_none() {
        info!("No admin_token configured, admin commands are disabled");
    }

    // 4. Start WebSocket server in background
    let addr: SocketAddr = format!("{}:{}", config.websocket_bind, config.websocket_port)
        .parse()
        .map_err(|e| format!("Invalid bind address: {}", e))?;

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state, addr).await {
            tracing::error!("Server error: {}", e);
        }
    });

    // 5. Shutdown signal
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // 6. Tick loop
    let dt = 1.0 / config.tick_rate_hz;
    let tick_interval = Duration::from_secs_f32(dt);
    let resync_ticks = ((config.resync_interval_secs * config.tick_rate_hz).round() as u64).max(1);
    let mut last_flush = Instant::now();
    let flush_interval = Duration::from_secs_f32(config.flush_interval_secs);
    let patterns_path = Path::new(&config.patterns_file);

    info!(
        tick_rate_hz = config.tick_rate_hz,
        flush_interval_secs = config.flush_interval_secs,
        "Weather simulation running"
    );

    loop {
        let tick_start = Instant::now();

        let mut broadcasts = Vec::new();
        while let Ok(command) = admin_rx.try_recv() {
            broadcasts.extend(server::apply_admin_command(&mut world, command, patterns_path));
        }

        let output = world.tick(dt);
        broadcasts.extend(server::build_tick_messages(&output));
        if !output.flashes.is_empty() {
            debug!(count = output.flashes.len(), "Lightning flashes");
        }

        let resync = world.tick_count() % resync_ticks == 0;
        if resync {
            broadcasts.push(
                ServerMessage::WorldClock {
                    total_days: world.total_days(),
                    day_length_secs: world.settings().day_length_secs,
                    world_seed,
                }
                .to_json(),
            );
        }
        let join = (resync || !broadcasts.is_empty()).then(|| server::build_join_messages(&world));

        let tick_ms = tick_start.elapsed().as_secs_f32() * 1000.0;
        state
            .on_tick(join, broadcasts, &TickReport::from_world(&world, tick_ms))
            .await;

        // Periodic flush
        if last_flush.elapsed() >= flush_interval {
            match world.flush_dirty() {
                Ok(n) => debug!(written = n, "Region weather flushed"),
                Err(e) => warn!("Region flush failed: {}", e),
            }
            last_flush = Instant::now();
        }

        if world.tick_count() % 1000 == 0 {
            info!(
                tick = world.tick_count(),
                total_days = format!("{:.3}", world.total_days()),
                clients = state.connected_clients(),
                "Tick milestone"
            );
        }

        // Rate limiting: sleep remaining time to hit target tick rate
        let elapsed = tick_start.elapsed();
        if elapsed < tick_interval {
            tokio::select! {
                _ = tokio::time::sleep(tick_interval - elapsed) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        } else {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::task::yield_now() => {}
            }
        }
    }

    // Graceful shutdown: write everything that changed
    match world.flush_dirty() {
        Ok(n) => info!(written = n, "Final region flush"),
        Err(e) => warn!("Final region flush failed: {}", e),
    }
    info!(tick = world.tick_count(), "Weather simulation stopped");
    Ok(())
}

/// Write a starter `config.toml` and pattern file.
pub fn init(config_path: &Path, force: bool) -> Result<(), String> {
    let config = SimulationConfig::default();
    let patterns_path = Path::new(&config.patterns_file);

    for path in [config_path, patterns_path] {
        if path.exists() && !force {
            return Err(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            ));
        }
    }

    let config_toml = config.to_toml_string().map_err(|e| e.to_string())?;
    std::fs::write(config_path, config_toml)
        .map_err(|e| format!("Cannot write {}: {}", config_path.display(), e))?;
    println!("Wrote {}", config_path.display());

    let patterns_toml = WeatherPatternAssets::builtin()
        .to_toml_string()
        .map_err(|e| e.to_string())?;
    std::fs::write(patterns_path, patterns_toml)
        .map_err(|e| format!("Cannot write {}: {}", patterns_path.display(), e))?;
    println!("Wrote {}", patterns_path.display());
    Ok(())
}

/// Show one saved region, or the world metadata and every saved region.
pub fn inspect(config: &SimulationConfig, region: Option<MapRegionKey>) -> Result<(), String> {
    let store = RegionStore::open(&config.save_directory)
        .map_err(|e| format!("Cannot open save directory {}: {}", config.save_directory, e))?;
    let assets = WeatherPatternAssets::from_file(Path::new(&config.patterns_file))
        .unwrap_or_else(|_| WeatherPatternAssets::builtin());

    match region {
        Some(key) => inspect_region(&store, &assets, key),
        None => inspect_world(&store),
    }
}

fn inspect_region(
    store: &RegionStore,
    assets: &WeatherPatternAssets,
    key: MapRegionKey,
) -> Result<(), String> {
    let blob = store
        .load_region(key)
        .map_err(|e| format!("Cannot read region {}: {}", key, e))?
        .ok_or_else(|| format!("Region {} has no saved weather", key))?;
    let state = WeatherSimulationRegion::deserialize(&blob)
        .map_err(|e| format!("Region {}: {}", key, e))?;

    println!("=== Region {} ===", key);
    println!("Blob: {} bytes", blob.len());
    println!("Selections: {}", state.selection_counter);
    println!();
    println!("--- Pattern ---");
    println!(
        "  Current: {} ({:.0}/{:.0}s, strength {:.2})",
        code_of(&state.new_pattern, &assets.patterns),
        state.new_pattern.elapsed_secs,
        state.new_pattern.duration_secs,
        state.new_pattern.strength
    );
    if state.transitioning {
        println!(
            "  Fading from: {} (weight {:.3} over {:.0}s)",
            code_of(&state.old_pattern, &assets.patterns),
            state.transition_weight,
            state.transition_delay_secs
        );
    }
    println!();
    println!("--- Wind ---");
    println!(
        "  {} ({:.0}/{:.0}s)",
        code_of(&state.wind, &assets.wind_patterns),
        state.wind.elapsed_secs,
        state.wind.duration_secs
    );
    println!();
    println!("--- Event ---");
    println!(
        "  {} ({:.0}/{:.0}s)",
        code_of(&state.event, &assets.events),
        state.event.elapsed_secs,
        state.event.duration_secs
    );
    Ok(())
}

fn code_of<C: EnvelopeConfig>(envelope: &EnvelopeState, configs: &[C]) -> String {
    envelope
        .config(configs)
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn inspect_world(store: &RegionStore) -> Result<(), String> {
    match store.load_metadata() {
        Ok(Some(meta)) => {
            println!("=== World {} ===", meta.id);
            println!("Seed: {}", meta.world_seed);
            println!("Tick: {}", meta.tick_count);
            println!("Days: {:.3}", meta.total_days);
            println!("Overrides: {:?}", meta.overrides);
            println!();
        }
        Ok(None) => println!("No world metadata in {}\n", store.dir().display()),
        Err(e) => println!("World metadata unreadable: {}\n", e),
    }

    let regions = store
        .list_regions()
        .map_err(|e| format!("Cannot list regions: {}", e))?;
    if regions.is_empty() {
        println!("No saved regions in {}", store.dir().display());
        return Ok(());
    }
    println!("{:<16} {:>10}", "Region", "Size");
    println!("{}", "-".repeat(27));
    for r in &regions {
        println!("{:<16} {:>7} B", r.key.to_string(), r.file_size);
    }
    println!("\n{} region(s) in {}", regions.len(), store.dir().display());
    Ok(())
}

/// Simulate the world locally for `ticks` ticks and print the blended
/// weather at `position`. Nothing is read from or written to disk.
pub fn sample(
    config: &SimulationConfig,
    position: DVec3,
    ticks: u32,
    json: bool,
) -> Result<(), String> {
    let assets = load_assets(config).unwrap_or_else(|e| {
        warn!("{}; using built-in patterns", e);
        WeatherPatternAssets::builtin()
    });
    let seed = if config.world_seed == 0 { 1 } else { config.world_seed };
    let settings = WeatherWorldSettings::from_config(config, seed);
    let mut world = WeatherWorld::new(
        settings,
        assets,
        default_climate(seed, config.sea_level),
        None,
    );
    world.load_all();

    let dt = 1.0 / config.tick_rate_hz;
    let mut reader =
        WeatherDataReader::new(settings.grid, world.sampler().clone(), config.snapshot_cache_ms);
    reader.load_adjacent_sims_and_lerp_values(position);
    for _ in 0..ticks {
        world.tick(dt);
        reader.update(&world, dt);
    }

    let snapshot = reader.update_adjacent_and_blend_weather_data(&world);
    let wind = reader.get_wind_speed_at(position);
    print_snapshot(&snapshot, wind, position, world.total_days(), json);
    Ok(())
}

/// Headless client: connect, apply updates once per tick, print the blended
/// weather at `position` once a second.
pub async fn probe(
    config: &SimulationConfig,
    url: &str,
    position: DVec3,
    seconds: f32,
    json: bool,
) -> Result<(), String> {
    let (mut weather, inbox) = ClientWeather::new(config);
    let connection = WeatherConnection::connect(url, inbox)
        .await
        .map_err(|e| format!("Cannot connect to {}: {}", url, e))?;

    let dt = 1.0 / config.tick_rate_hz;
    let tick_interval = Duration::from_secs_f32(dt);
    let ticks_per_report = (config.tick_rate_hz.round() as u32).max(1);
    let total_ticks = (seconds * config.tick_rate_hz).ceil() as u32;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    for tick in 1..=total_ticks {
        let report = weather.tick(dt, position);
        if weather.sync_mut().take_cloud_rebuild_request() {
            debug!(instant = report.instant_updates, "Cloud rebuild requested");
        }
        for flash in weather.sync_mut().drain_lightning_flashes() {
            info!(region = %flash.region, x = flash.position.x, z = flash.position.z, "Lightning");
        }

        if tick % ticks_per_report == 0 {
            let snapshot = weather.blended_weather_data();
            let wind = weather.get_wind_speed_at(position);
            let days = crate::simulation::region_state::RegionSource::total_days(weather.sync());
            print_snapshot(&snapshot, wind, position, days, json);
        }
        if !connection.is_connected() {
            warn!("Weather server closed the connection");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            _ = &mut shutdown => break,
        }
    }

    connection.close();
    Ok(())
}

fn print_snapshot(
    snapshot: &WeatherDataSnapshot,
    wind: glam::Vec3,
    position: DVec3,
    days: f64,
    json: bool,
) {
    if json {
        let value = serde_json::json!({
            "position": [position.x, position.y, position.z],
            "total_days": days,
            "precipitation": snapshot.precipitation,
            "precipitation_type": snapshot.precipitation_type,
            "particle_size": snapshot.particle_size,
            "temperature": snapshot.temperature,
            "wind": [wind.x, wind.y, wind.z],
            "fog_density": snapshot.ambient.fog_density,
            "cloud_density": snapshot.ambient.cloud_density,
            "light_level": snapshot.ambient.light_level,
            "lightning_rate": snapshot.lightning_rate,
            "cloud_level_rel": snapshot.cloud_level_rel,
        });
        println!("{}", value);
        return;
    }

    println!(
        "day {:.4} @ ({:.0}, {:.0}, {:.0}) | precip {:.3} {:?} | {:.1}°C | wind {:.1} m/s | fog {:.2} clouds {:.2} light {:.2}",
        days,
        position.x,
        position.y,
        position.z,
        snapshot.precipitation,
        snapshot.precipitation_type,
        snapshot.temperature,
        wind.length(),
        snapshot.ambient.fog_density,
        snapshot.ambient.cloud_density,
        snapshot.ambient.light_level,
    );
}
