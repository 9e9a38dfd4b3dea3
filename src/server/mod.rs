pub mod protocol;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::config::WeatherPatternAssets;
use crate::simulation::composer::GlobalOverrides;
use crate::simulation::weather_world::{TickOutput, WeatherWorld};
use crate::world::MapRegionKey;
use protocol::{AdminCommand, AdminRequest, HealthStatus, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared server state accessible from all connection handlers and the tick loop.
pub struct ServerState {
    /// Messages sent to a client right after it connects (JSON, ready to send).
    pub join_messages: RwLock<Vec<String>>,
    /// Broadcast channel for per-tick weather messages.
    pub tick_sender: broadcast::Sender<String>,
    pub health: RwLock<HealthData>,
    admin_sender: mpsc::UnboundedSender<AdminCommand>,
    /// Without a token no client may issue admin commands.
    admin_token: Option<String>,
    connected_clients: AtomicUsize,
}

/// Data needed for the health endpoint.
pub struct HealthData {
    pub tick: u64,
    pub total_days: f64,
    pub loaded_regions: usize,
    pub overrides: GlobalOverrides,
    pub recent_tick_durations_ms: Vec<f32>,
}

impl HealthData {
    pub fn tick_rate(&self) -> f32 {
        if self.recent_tick_durations_ms.is_empty() {
            return 0.0;
        }
        let avg_ms: f32 = self.recent_tick_durations_ms.iter().sum::<f32>()
            / self.recent_tick_durations_ms.len() as f32;
        if avg_ms <= 0.0 {
            return 0.0;
        }
        1000.0 / avg_ms
    }
}

/// What the tick loop reports after each tick.
#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    pub tick: u64,
    pub total_days: f64,
    pub loaded_regions: usize,
    pub overrides: GlobalOverrides,
    pub tick_duration_ms: f32,
}

impl TickReport {
    pub fn from_world(world: &WeatherWorld, tick_duration_ms: f32) -> Self {
        TickReport {
            tick: world.tick_count(),
            total_days: world.total_days(),
            loaded_regions: world.loaded_region_count(),
            overrides: world.overrides(),
            tick_duration_ms,
        }
    }
}

impl ServerState {
    pub fn new(join_messages: Vec<String>, admin_sender: mpsc::UnboundedSender<AdminCommand>) -> Self {
        let (tx, _) = broadcast::channel(64);
        ServerState {
            join_messages: RwLock::new(join_messages),
            tick_sender: tx,
            health: RwLock::new(HealthData {
                tick: 0,
                total_days: 0.0,
                loaded_regions: 0,
                overrides: GlobalOverrides::default(),
                recent_tick_durations_ms: Vec::new(),
            }),
            admin_sender,
            admin_token: None,
            connected_clients: AtomicUsize::new(0),
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    /// The command inside `request` if its token matches the configured one.
    fn authorize(&self, request: AdminRequest) -> Option<AdminCommand> {
        match &self.admin_token {
            Some(expected) if *expected == request.token => Some(request.command),
            _ => None,
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.connected_clients.load(Ordering::Relaxed)
    }

    /// Push this tick's messages to every client and refresh health.
    /// `join_messages` replaces the bundle handed to new connections when given.
    pub async fn on_tick(
        &self,
        join_messages: Option<Vec<String>>,
        broadcasts: Vec<String>,
        report: &TickReport,
    ) {
        if let Some(messages) = join_messages {
            *self.join_messages.write().await = messages;
        }

        // No receivers is fine
        for json in broadcasts {
            let _ = self.tick_sender.send(json);
        }

        let mut health = self.health.write().await;
        health.tick = report.tick;
        health.total_days = report.total_days;
        health.loaded_regions = report.loaded_regions;
        health.overrides = report.overrides;
        health.recent_tick_durations_ms.push(report.tick_duration_ms);
        // Keep only the last 100 tick durations for rate calculation
        if health.recent_tick_durations_ms.len() > 100 {
            health.recent_tick_durations_ms.remove(0);
        }
    }
}

/// Everything a freshly connected client needs before deltas make sense:
/// definitions, overrides, clock, then every loaded region.
pub fn build_join_messages(world: &WeatherWorld) -> Vec<String> {
    let overrides = world.overrides();
    let mut messages = vec![
        ServerMessage::WeatherPatternAssets {
            assets: world.assets().clone(),
        }
        .to_json(),
        ServerMessage::weather_config(&overrides).to_json(),
        ServerMessage::cloud_ypos(&overrides).to_json(),
        ServerMessage::WorldClock {
            total_days: world.total_days(),
            day_length_secs: world.settings().day_length_secs,
            world_seed: world.settings().world_seed,
        }
        .to_json(),
    ];
    messages.extend(
        world
            .state_deltas()
            .iter()
            .map(|delta| ServerMessage::from_delta(delta).to_json()),
    );
    messages
}

pub fn build_tick_messages(output: &TickOutput) -> Vec<String> {
    output
        .deltas
        .iter()
        .map(ServerMessage::from_delta)
        .chain(output.flashes.iter().map(ServerMessage::lightning))
        .map(|msg| msg.to_json())
        .collect()
}

/// Apply one operator command. Returns messages to broadcast right away;
/// region changes ride out with the next tick.
pub fn apply_admin_command(
    world: &mut WeatherWorld,
    command: AdminCommand,
    patterns_file: &Path,
) -> Vec<String> {
    match command {
        AdminCommand::SetPattern {
            region_x,
            region_z,
            code,
            instant,
        } => {
            let key = MapRegionKey::new(region_x, region_z);
            if let Err(e) = world.set_pattern(key, &code, instant) {
                warn!(region = %key, "SetPattern rejected: {}", e);
            }
            Vec::new()
        }
        AdminCommand::SetPrecipitationOverride { value } => {
            world.set_precipitation_override(value);
            info!(value = ?world.overrides().override_precipitation, "Precipitation override set");
            vec![ServerMessage::weather_config(&world.overrides()).to_json()]
        }
        AdminCommand::SetRainCloudDaysOffset { days } => {
            world.set_rain_cloud_days_offset(days);
            vec![ServerMessage::weather_config(&world.overrides()).to_json()]
        }
        AdminCommand::SetCloudLevel { level } => {
            world.set_cloud_level(level);
            vec![ServerMessage::cloud_ypos(&world.overrides()).to_json()]
        }
        AdminCommand::ReloadAssets => {
            let assets = match WeatherPatternAssets::from_file(patterns_file) {
                Ok(a) => a,
                Err(e) => {
                    warn!(path = %patterns_file.display(), "Asset reload failed, keeping current set: {}", e);
                    return Vec::new();
                }
            };
            if let Err(e) = world.replace_assets(assets) {
                warn!("Asset reload rejected: {}", e);
                return Vec::new();
            }
            vec![
                ServerMessage::WeatherPatternAssets {
                    assets: world.assets().clone(),
                }
                .to_json(),
            ]
        }
    }
}

/// Start the WebSocket + HTTP server on the given address.
pub async fn start_server(state: Arc<ServerState>, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Weather server listening");
    serve(listener, state).await
}

async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<(), ServerError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, state).await {
                error!(%peer, "Connection error: {}", e);
            }
        });
    }
}

/// Route an incoming TCP connection to WebSocket or HTTP.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), ServerError> {
    let mut buf = [0u8; 512];
    let n = stream.peek(&mut buf).await?;
    let request_line = String::from_utf8_lossy(&buf[..n]).to_lowercase();

    if request_line.contains("upgrade: websocket") {
        handle_websocket(stream, peer, state).await
    } else if request_line.contains("get /health") {
        handle_health_request(stream, state).await
    } else {
        handle_not_found(stream).await
    }
}

/// Send the join bundle, then stream tick messages and accept admin commands.
async fn handle_websocket(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!(%peer, "WebSocket connected");
    state.connected_clients.fetch_add(1, Ordering::Relaxed);

    let result = stream_to_client(ws_stream, peer, &state).await;

    state.connected_clients.fetch_sub(1, Ordering::Relaxed);
    info!(%peer, "WebSocket disconnected");
    result
}

async fn stream_to_client(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    peer: SocketAddr,
    state: &ServerState,
) -> Result<(), ServerError> {
    let (mut write, mut read) = futures_util::StreamExt::split(ws_stream);

    // Subscribe before sending the bundle so nothing falls between the two
    let mut rx = state.tick_sender.subscribe();

    let join = state.join_messages.read().await.clone();
    for json in join {
        futures_util::SinkExt::send(&mut write, Message::Text(json.into())).await?;
    }

    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Ok(json) => {
                        if futures_util::SinkExt::send(&mut write, Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // The periodic resync repairs whatever was missed
                        warn!(%peer, lagged = n, "Client lagged behind on weather updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = futures_util::StreamExt::next(&mut read) => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let request = match serde_json::from_str::<AdminRequest>(text.as_str()) {
                            Ok(request) => request,
                            Err(e) => {
                                warn!(%peer, "Ignoring malformed client message: {}", e);
                                continue;
                            }
                        };
                        let Some(command) = state.authorize(request) else {
                            warn!(%peer, "Rejected admin command without a valid token");
                            continue;
                        };
                        info!(%peer, ?command, "Admin command received");
                        if state.admin_sender.send(command).is_err() {
                            warn!(%peer, "Tick loop is gone, dropping admin command");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

async fn handle_health_request(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> Result<(), ServerError> {
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    // Read and discard the full HTTP request
    let mut buf = vec![0u8; 4096];
    let _ = stream.read(&mut buf).await?;

    let status = {
        let health = state.health.read().await;
        HealthStatus {
            tick: health.tick,
            tick_rate: health.tick_rate(),
            total_days: health.total_days,
            loaded_regions: health.loaded_regions,
            connected_clients: state.connected_clients(),
            overrides: health.overrides,
        }
    };

    let body = serde_json::to_string(&status)?;
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    Ok(())
}

async fn handle_not_found(mut stream: TcpStream) -> Result<(), ServerError> {
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    let mut buf = vec![0u8; 4096];
    let _ = stream.read(&mut buf).await?;

    let body = "not found";
    let response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::simulation::weather_world::WeatherWorldSettings;
    use crate::world::{ClimateSample, UniformClimate};
    use std::time::Duration;

    fn small_world() -> WeatherWorld {
        let config = SimulationConfig {
            map_size_x: 1024,
            map_size_z: 1024,
            region_size: 512,
            ..SimulationConfig::default()
        };
        let settings = WeatherWorldSettings::from_config(&config, 42);
        let climate = Arc::new(UniformClimate {
            climate: ClimateSample {
                temperature: 15.0,
                rainfall: 0.5,
            },
            surface_height: 120.0,
        });
        let mut world =
            WeatherWorld::new(settings, WeatherPatternAssets::builtin(), climate, None);
        world.load_all();
        world
    }

    fn new_state(join: Vec<String>) -> (ServerState, mpsc::UnboundedReceiver<AdminCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ServerState::new(join, tx), rx)
    }

    fn report(tick: u64, tick_duration_ms: f32) -> TickReport {
        TickReport {
            tick,
            total_days: 0.5,
            loaded_regions: 4,
            overrides: GlobalOverrides::default(),
            tick_duration_ms,
        }
    }

    async fn next_text(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
    ) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(5), futures_util::StreamExt::next(ws))
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("message error");
        msg.into_text().unwrap().as_str().to_owned()
    }

    #[test]
    fn join_messages_lead_with_assets_and_cover_every_region() {
        let world = small_world();
        let messages = build_join_messages(&world);
        assert_eq!(messages.len(), 4 + 4);

        let first: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(first["message_type"], "WeatherPatternAssets");

        let types: Vec<String> = messages
            .iter()
            .map(|m| {
                let v: serde_json::Value = serde_json::from_str(m).unwrap();
                v["message_type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(types[1], "WeatherConfig");
        assert_eq!(types[2], "WeatherCloudYpos");
        assert_eq!(types[3], "WorldClock");
        assert!(types[4..].iter().all(|t| t == "WeatherState"));

        for json in &messages[4..] {
            match ServerMessage::from_json(json).unwrap() {
                ServerMessage::WeatherState { update_instant, .. } => assert!(!update_instant),
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[test]
    fn tick_messages_include_deltas_and_flashes() {
        let mut world = small_world();
        world
            .set_pattern(MapRegionKey::new(1, 1), "rain", false)
            .unwrap();
        let output = world.tick(0.25);
        let messages = build_tick_messages(&output);
        assert_eq!(messages.len(), output.deltas.len() + output.flashes.len());
        assert!(
            messages
                .iter()
                .any(|m| m.contains("\"region_x\":1") && m.contains("WeatherState"))
        );
    }

    #[test]
    fn admin_override_commands_broadcast_config() {
        let mut world = small_world();
        let out = apply_admin_command(
            &mut world,
            AdminCommand::SetPrecipitationOverride { value: Some(0.4) },
            Path::new("/nonexistent/patterns.toml"),
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("WeatherConfig"));
        assert_eq!(world.overrides().override_precipitation, Some(0.4));

        let out = apply_admin_command(
            &mut world,
            AdminCommand::SetCloudLevel { level: 12.0 },
            Path::new("/nonexistent/patterns.toml"),
        );
        assert!(out[0].contains("WeatherCloudYpos"));
        assert_eq!(world.overrides().cloud_level_rel, 12.0);
    }

    #[test]
    fn admin_unknown_pattern_is_ignored() {
        let mut world = small_world();
        let out = apply_admin_command(
            &mut world,
            AdminCommand::SetPattern {
                region_x: 0,
                region_z: 0,
                code: "sandstorm".to_string(),
                instant: true,
            },
            Path::new("/nonexistent/patterns.toml"),
        );
        assert!(out.is_empty());
        assert!(world.tick(0.0).deltas.is_empty());
    }

    #[test]
    fn admin_reload_from_missing_file_keeps_assets() {
        let mut world = small_world();
        let before = world.assets().clone();
        let out = apply_admin_command(
            &mut world,
            AdminCommand::ReloadAssets,
            Path::new("/nonexistent/patterns.toml"),
        );
        assert!(out.is_empty());
        assert_eq!(world.assets(), &before);
    }

    #[test]
    fn admin_reload_broadcasts_new_assets() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("patterns.toml");
        let mut assets = WeatherPatternAssets::builtin();
        assets.patterns.truncate(2);
        std::fs::write(&path, assets.to_toml_string().unwrap()).unwrap();

        let mut world = small_world();
        let out = apply_admin_command(&mut world, AdminCommand::ReloadAssets, &path);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("WeatherPatternAssets"));
        assert_eq!(world.assets().patterns.len(), 2);
    }

    #[tokio::test]
    async fn server_state_on_tick_updates_health() {
        let (state, _rx) = new_state(Vec::new());
        state.on_tick(None, Vec::new(), &report(5, 100.0)).await;

        let health = state.health.read().await;
        assert_eq!(health.tick, 5);
        assert_eq!(health.loaded_regions, 4);
        assert_eq!(health.recent_tick_durations_ms.len(), 1);
    }

    #[tokio::test]
    async fn server_state_replaces_join_bundle() {
        let (state, _rx) = new_state(vec!["initial".to_string()]);
        state
            .on_tick(Some(vec!["updated".to_string()]), Vec::new(), &report(1, 10.0))
            .await;
        assert_eq!(*state.join_messages.read().await, vec!["updated".to_string()]);

        state.on_tick(None, Vec::new(), &report(2, 10.0)).await;
        assert_eq!(*state.join_messages.read().await, vec!["updated".to_string()]);
    }

    #[tokio::test]
    async fn tick_rate_calculation() {
        let (state, _rx) = new_state(Vec::new());
        // 5 ticks at 200ms each is 5 ticks/sec
        for i in 0..5 {
            state.on_tick(None, Vec::new(), &report(i, 200.0)).await;
        }
        let health = state.health.read().await;
        assert!((health.tick_rate() - 5.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn health_recent_durations_capped_at_100() {
        let (state, _rx) = new_state(Vec::new());
        for i in 0..150 {
            state.on_tick(None, Vec::new(), &report(i, 50.0)).await;
        }
        let health = state.health.read().await;
        assert_eq!(health.recent_tick_durations_ms.len(), 100);
    }

    #[tokio::test]
    async fn broadcast_each_message_in_order() {
        let (state, _rx) = new_state(Vec::new());
        let mut rx = state.tick_sender.subscribe();
        state
            .on_tick(
                None,
                vec!["first".to_string(), "second".to_string()],
                &report(1, 10.0),
            )
            .await;
        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn websocket_client_receives_join_bundle_then_updates() {
        let world = small_world();
        let join = build_join_messages(&world);
        let join_len = join.len();
        let (state, _admin_rx) = new_state(join);
        let state = Arc::new(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_state = Arc::clone(&state);
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_websocket(stream, peer, server_state).await;
            }
        });

        let url = format!("ws://127.0.0.1:{}", addr.port());
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        for i in 0..join_len {
            let text = next_text(&mut ws).await;
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            if i == 0 {
                assert_eq!(parsed["message_type"], "WeatherPatternAssets");
            }
        }
        assert_eq!(state.connected_clients(), 1);

        state
            .on_tick(
                None,
                vec![r#"{"message_type":"WeatherCloudYpos","cloud_level_rel":3.0}"#.to_string()],
                &report(1, 10.0),
            )
            .await;

        let text = next_text(&mut ws).await;
        assert!(text.contains("WeatherCloudYpos"));

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
        assert_eq!(state.connected_clients(), 0);
    }

    async fn send_text(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
        text: String,
    ) {
        futures_util::SinkExt::send(ws, Message::Text(text.into()))
            .await
            .unwrap();
    }

    async fn spawn_ws_server(
        state: Arc<ServerState>,
    ) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_websocket(stream, peer, state).await;
            }
        });
        (format!("ws://127.0.0.1:{}", addr.port()), handle)
    }

    #[tokio::test]
    async fn websocket_admin_command_needs_matching_token() {
        let (state, mut admin_rx) = new_state(Vec::new());
        let state = Arc::new(state.with_admin_token(Some("s3cret".to_string())));
        let (url, server_handle) = spawn_ws_server(Arc::clone(&state)).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        send_text(&mut ws, "garbage".to_string()).await;
        let rejected = AdminCommand::SetPrecipitationOverride { value: Some(1.0) };
        send_text(&mut ws, rejected.to_json()).await;
        send_text(&mut ws, AdminRequest::new("guess", rejected.clone()).to_json()).await;
        let command = AdminCommand::SetCloudLevel { level: -2.0 };
        send_text(&mut ws, AdminRequest::new("s3cret", command.clone()).to_json()).await;

        let received = tokio::time::timeout(Duration::from_secs(5), admin_rx.recv())
            .await
            .expect("timeout waiting for command")
            .expect("channel closed");
        assert_eq!(received, command);
        assert!(admin_rx.try_recv().is_err());

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn admin_commands_rejected_without_configured_token() {
        let (state, mut admin_rx) = new_state(Vec::new());
        let state = Arc::new(state);
        let (url, server_handle) = spawn_ws_server(Arc::clone(&state)).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let command = AdminCommand::ReloadAssets;
        send_text(&mut ws, command.to_json()).await;
        send_text(&mut ws, AdminRequest::new("", command.clone()).to_json()).await;
        send_text(&mut ws, AdminRequest::new("anything", command).to_json()).await;

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let (state, _rx) = new_state(Vec::new());
        let state = Arc::new(state);
        state.on_tick(None, Vec::new(), &report(42, 20.0)).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_state = Arc::clone(&state);
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_connection(stream, peer, server_state).await;
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response_str = String::from_utf8_lossy(&response);

        assert!(response_str.contains("200 OK"));
        assert!(response_str.contains("application/json"));

        let body_start = response_str.find('{').unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&response_str[body_start..]).unwrap();
        assert_eq!(parsed["tick"], 42);
        assert_eq!(parsed["loaded_regions"], 4);
        assert_eq!(parsed["connected_clients"], 0);

        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn other_paths_get_404() {
        let (state, _rx) = new_state(Vec::new());
        let state = Arc::new(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_connection(stream, peer, state).await;
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).contains("404 Not Found"));

        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn client_disconnect_does_not_crash_server() {
        let (state, _rx) = new_state(vec![r#"{"message_type":"WorldClock"}"#.to_string()]);
        let state = Arc::new(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_state = Arc::clone(&state);
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_websocket(stream, peer, server_state).await;
            }
        });

        let url = format!("ws://127.0.0.1:{}", addr.port());
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        drop(ws);

        let result = tokio::time::timeout(Duration::from_secs(5), server_handle).await;
        assert!(result.is_ok(), "Server should handle disconnect within 5s");
        assert_eq!(state.connected_clients(), 0);
    }
}
