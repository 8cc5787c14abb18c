use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use autoterm_common::{
    climate::parse_fan_mode_label, sensor_topic, Bridge, BridgeConfig, BridgeError, BridgeSnapshot,
    ClimateCall, CommandIntentSource, CounterStore, Intent, TelemetrySink, TemperatureSource,
    TOPIC_BRIDGE_STATE, TOPIC_CMD_CLIMATE, TOPIC_CMD_FAN, TOPIC_CMD_HYSTERESIS,
    TOPIC_CMD_PANEL_OVERRIDE, TOPIC_CMD_SOURCE,
};

use crate::serial::SerialLink;

type HostBridge = Bridge<SerialLink, SerialLink, MqttTelemetry, JsonCounterStore>;

const CONTROL_TICK: Duration = Duration::from_millis(10);
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);
const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Clone)]
struct AppState {
    snapshot: Arc<Mutex<BridgeSnapshot>>,
    intents: mpsc::UnboundedSender<Intent>,
    mqtt: AsyncClient,
}

#[derive(Clone)]
struct AppStore {
    config_path: Arc<PathBuf>,
    counter_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct QueuedResponse {
    queued: bool,
}

/// Hysteresis update as sent on the MQTT command topic.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HysteresisRequest {
    on: Option<f32>,
    off: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterRecord {
    #[serde(rename = "runtimeHours")]
    runtime_hours: f32,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load bridge config from store: {err:#}");
        BridgeConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let heater = SerialLink::open(&config.serial.heater_port, config.serial.baud_rate)
        .context("heater port is required")?;
    info!("heater link on {}", heater.name());

    let display = match config.serial.display_port.as_deref() {
        Some(port) => match SerialLink::open(port, config.serial.baud_rate) {
            Ok(link) => {
                info!("display link on {}", link.name());
                Some(link)
            }
            Err(err) => {
                warn!("{err:#}; continuing without a display");
                None
            }
        },
        None => None,
    };

    let mut mqtt_options = MqttOptions::new(
        "autoterm-bridge",
        config.mqtt.host.clone(),
        config.mqtt.port,
    );
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(config.mqtt.user.clone(), config.mqtt.pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let mut bridge: HostBridge = Bridge::new(
        &config,
        heater,
        display,
        MqttTelemetry {
            client: mqtt.clone(),
        },
        JsonCounterStore {
            path: store.counter_path.as_ref().clone(),
        },
    );
    let report = bridge.start();
    for failure in &report.failures {
        warn!("startup: {failure}");
    }

    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let app_state = AppState {
        snapshot: Arc::new(Mutex::new(bridge.snapshot())),
        intents: intent_tx,
        mqtt,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(bridge, IntentInbox(intent_rx), app_state.snapshot.clone());
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/climate", post(handle_post_climate))
        .route("/api/fan", post(handle_post_fan))
        .route("/api/source", post(handle_post_source))
        .route("/api/panel-override", post(handle_post_panel_override))
        .route("/api/hysteresis", post(handle_post_hysteresis))
        .with_state(app_state);

    let port = std::env::var("AUTOTERM_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .or(config.http_port)
        .unwrap_or(DEFAULT_HTTP_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind bridge server at {addr}"))?;

    info!("bridge listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(port) = std::env::var("AUTOTERM_HEATER_PORT") {
        config.serial.heater_port = port;
    }
    if let Ok(port) = std::env::var("AUTOTERM_DISPLAY_PORT") {
        // An empty value disables the display link; sanitize() turns it into None.
        config.serial.display_port = Some(port);
    }
    if let Some(baud) = std::env::var("AUTOTERM_BAUD")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        config.serial.baud_rate = baud;
    }
    if let Ok(host) = std::env::var("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.mqtt.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        config.mqtt.user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        config.mqtt.pass = pass;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_CMD_CLIMATE,
        TOPIC_CMD_FAN,
        TOPIC_CMD_SOURCE,
        TOPIC_CMD_PANEL_OVERRIDE,
        TOPIC_CMD_HYSTERESIS,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, message.payload.to_vec())
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// The bridge lives on this task alone; everyone else talks to it through
/// the intent channel and reads the snapshot.
fn spawn_control_loop(
    mut bridge: HostBridge,
    mut inbox: IntentInbox,
    snapshot: Arc<Mutex<BridgeSnapshot>>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONTROL_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let report = bridge.tick(monotonic_ms(), &mut inbox);
            for failure in &report.failures {
                debug!("tick: {failure}");
            }
            *snapshot.lock().await = bridge.snapshot();
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            interval.tick().await;

            let payload = {
                let snapshot = app_state.snapshot.lock().await;
                serde_json::to_vec(&*snapshot)
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_BRIDGE_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("bridge state publish failed: {err}");
                    }
                }
                Err(err) => warn!("bridge state serialization failed: {err}"),
            }
        }
    });
}

fn handle_mqtt_message(app_state: &AppState, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let intent = match topic {
        TOPIC_CMD_CLIMATE => Some(Intent::Climate(
            serde_json::from_str::<ClimateCall>(&message).context("invalid climate call")?,
        )),
        TOPIC_CMD_FAN => parse_fan_level(&message).map(Intent::FanLevel),
        TOPIC_CMD_SOURCE => parse_source(&message).map(Intent::TemperatureSource),
        TOPIC_CMD_PANEL_OVERRIDE => parse_panel_override(&message).map(Intent::PanelOverride),
        TOPIC_CMD_HYSTERESIS => {
            let request = serde_json::from_str::<HysteresisRequest>(&message)
                .context("invalid hysteresis request")?;
            hysteresis_intent(request.on, request.off)
        }
        _ => None,
    };

    match intent {
        Some(intent) => app_state
            .intents
            .send(intent)
            .context("control loop has stopped"),
        None => {
            warn!("ignoring payload {:?} on {}", message, topic);
            Ok(())
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot.lock().await.clone();
    Json(snapshot)
}

async fn handle_post_climate(
    State(state): State<AppState>,
    Json(call): Json<ClimateCall>,
) -> impl IntoResponse {
    queue_intent(&state, Intent::Climate(call))
}

async fn handle_post_fan(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(level) = parse_fan_level(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid fan level");
    };
    queue_intent(&state, Intent::FanLevel(level))
}

async fn handle_post_source(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(source) = parse_source(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature source");
    };
    queue_intent(&state, Intent::TemperatureSource(source))
}

async fn handle_post_panel_override(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(temp) = parse_panel_override(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid panel temperature");
    };
    queue_intent(&state, Intent::PanelOverride(temp))
}

async fn handle_post_hysteresis(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let on = params.get("on").map(|value| value.trim().parse::<f32>());
    let off = params.get("off").map(|value| value.trim().parse::<f32>());
    let (Ok(on), Ok(off)) = (on.transpose(), off.transpose()) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid hysteresis value");
    };
    let Some(intent) = hysteresis_intent(on, off) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Expected 'on' (1.0-5.0) and/or 'off' (0.0-2.0)",
        );
    };
    queue_intent(&state, intent)
}

fn queue_intent(state: &AppState, intent: Intent) -> axum::response::Response {
    if state.intents.send(intent).is_err() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Control loop is not running",
        );
    }
    (StatusCode::ACCEPTED, Json(QueuedResponse { queued: true })).into_response()
}

/// Accepts a bare level or a `Level N` label.
fn parse_fan_level(value: &str) -> Option<i32> {
    let value = value.trim();
    value
        .parse::<i32>()
        .ok()
        .or_else(|| parse_fan_mode_label(value).map(i32::from))
}

/// `Some(None)` hands source selection back to the heater settings.
fn parse_source(value: &str) -> Option<Option<TemperatureSource>> {
    match value.trim() {
        "" | "Auto" | "auto" => Some(None),
        label => TemperatureSource::from_label(label)
            .or_else(|| label.parse::<u8>().ok().and_then(TemperatureSource::from_byte))
            .map(Some),
    }
}

/// `Some(None)` clears the override.
fn parse_panel_override(value: &str) -> Option<Option<f32>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    value
        .parse::<f32>()
        .ok()
        .filter(|temp| temp.is_finite() && (-50.0..=80.0).contains(temp))
        .map(Some)
}

/// Out-of-range values are clamped by the bridge; only missing or non-finite
/// input is rejected here.
fn hysteresis_intent(on: Option<f32>, off: Option<f32>) -> Option<Intent> {
    let finite = |value: &Option<f32>| value.map_or(true, f32::is_finite);
    if (on.is_none() && off.is_none()) || !finite(&on) || !finite(&off) {
        return None;
    }
    Some(Intent::Hysteresis {
        on_c: on,
        off_c: off,
    })
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("AUTOTERM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.autoterm"));

        Self {
            config_path: Arc::new(data_dir.join("bridge.json")),
            counter_path: Arc::new(data_dir.join("runtime_hours.json")),
        }
    }

    async fn load_config(&self) -> anyhow::Result<BridgeConfig> {
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<BridgeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BridgeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Publishes each telemetry value to its own retained MQTT topic.
struct MqttTelemetry {
    client: AsyncClient,
}

impl MqttTelemetry {
    fn send(&self, name: &str, payload: String) {
        // try_publish keeps the tick from waiting on a full request queue.
        if let Err(err) = self
            .client
            .try_publish(sensor_topic(name), QoS::AtMostOnce, true, payload)
        {
            debug!("telemetry publish of {name} dropped: {err}");
        }
    }
}

impl TelemetrySink for MqttTelemetry {
    fn publish(&mut self, name: &str, value: f32) {
        self.send(name, format!("{value:.2}"));
    }

    fn publish_text(&mut self, name: &str, value: &str) {
        self.send(name, value.to_string());
    }
}

/// Runtime-hour counter kept as a small JSON file next to the config.
///
/// `CounterStore` is synchronous because the bridge tick is. File access runs
/// under `block_in_place`, so the worker hands its other tasks (MQTT, HTTP)
/// to another thread for the duration. Requires the multi-threaded runtime.
struct JsonCounterStore {
    path: PathBuf,
}

impl CounterStore for JsonCounterStore {
    fn load(&mut self) -> Result<Option<f32>, BridgeError> {
        tokio::task::block_in_place(|| read_counter(&self.path))
    }

    fn save(&mut self, hours: f32) -> Result<(), BridgeError> {
        tokio::task::block_in_place(|| write_counter(&self.path, hours))
    }
}

fn read_counter(path: &Path) -> Result<Option<f32>, BridgeError> {
    match std::fs::read(path) {
        Ok(raw) => serde_json::from_slice::<CounterRecord>(&raw)
            .map(|record| Some(record.runtime_hours))
            .map_err(|err| storage_error(path, err)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(storage_error(path, err)),
    }
}

fn write_counter(path: &Path, hours: f32) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| storage_error(path, err))?;
    }
    let payload = serde_json::to_vec_pretty(&CounterRecord {
        runtime_hours: hours,
    })
    .map_err(|err| storage_error(path, err))?;
    std::fs::write(path, payload).map_err(|err| storage_error(path, err))
}

fn storage_error(path: &Path, err: impl std::fmt::Display) -> BridgeError {
    BridgeError::StorageUnavailable(format!("{}: {err}", path.display()))
}

struct IntentInbox(mpsc::UnboundedReceiver<Intent>);

impl CommandIntentSource for IntentInbox {
    fn next_intent(&mut self) -> Option<Intent> {
        self.0.try_recv().ok()
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_level_accepts_labels() {
        assert_eq!(parse_fan_level("5"), Some(5));
        assert_eq!(parse_fan_level(" Level 3 "), Some(3));
        assert_eq!(parse_fan_level("fast"), None);
    }

    #[test]
    fn source_parsing() {
        assert_eq!(parse_source("External"), Some(Some(TemperatureSource::External)));
        assert_eq!(parse_source("Manual"), Some(Some(TemperatureSource::Panel)));
        assert_eq!(parse_source("3"), Some(Some(TemperatureSource::Heater)));
        assert_eq!(parse_source("auto"), Some(None));
        assert_eq!(parse_source("9"), None);
    }

    #[test]
    fn panel_override_parsing() {
        assert_eq!(parse_panel_override("21.5"), Some(Some(21.5)));
        assert_eq!(parse_panel_override("none"), Some(None));
        assert_eq!(parse_panel_override("NaN"), None);
        assert_eq!(parse_panel_override("500"), None);
    }

    #[test]
    fn hysteresis_requests() {
        assert_eq!(
            hysteresis_intent(Some(3.0), None),
            Some(Intent::Hysteresis {
                on_c: Some(3.0),
                off_c: None
            })
        );
        assert_eq!(hysteresis_intent(None, None), None);
        assert_eq!(hysteresis_intent(Some(2.0), Some(f32::NAN)), None);

        let request: HysteresisRequest = serde_json::from_str(r#"{"off":0.5}"#).unwrap();
        assert_eq!(request.on, None);
        assert_eq!(request.off, Some(0.5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn counter_store_runs_on_runtime_worker() {
        let dir = std::env::temp_dir().join(format!("autoterm-counter-rt-{}", std::process::id()));
        let mut store = JsonCounterStore {
            path: dir.join("runtime_hours.json"),
        };

        // Another task keeps making progress while the store touches the disk.
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            true
        });
        store.save(7.25).unwrap();
        assert_eq!(store.load().unwrap(), Some(7.25));
        assert!(ticker.await.unwrap());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn counter_store_round_trips_through_file() {
        let dir = std::env::temp_dir().join(format!("autoterm-counter-{}", std::process::id()));
        let mut store = JsonCounterStore {
            path: dir.join("runtime_hours.json"),
        };

        assert_eq!(store.load().unwrap(), None);
        store.save(42.5).unwrap();
        assert_eq!(store.load().unwrap(), Some(42.5));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
