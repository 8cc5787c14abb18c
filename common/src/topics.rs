// Telemetry names handed to the sink. The MQTT adapter publishes each under
// `autoterm/sensor/<name>`.
pub const TELEMETRY_INTERNAL_TEMP: &str = "internal_temperature";
pub const TELEMETRY_EXTERNAL_TEMP: &str = "external_temperature";
pub const TELEMETRY_HEATER_TEMP: &str = "heater_temperature";
pub const TELEMETRY_PANEL_TEMP: &str = "panel_temperature";
pub const TELEMETRY_VOLTAGE: &str = "voltage";
pub const TELEMETRY_STATUS_CODE: &str = "status_code";
pub const TELEMETRY_STATUS_TEXT: &str = "status_text";
pub const TELEMETRY_FAN_SPEED_SET: &str = "fan_speed_set";
pub const TELEMETRY_FAN_SPEED_ACTUAL: &str = "fan_speed_actual";
pub const TELEMETRY_PUMP_FREQUENCY: &str = "pump_frequency";
pub const TELEMETRY_RUNTIME_HOURS: &str = "runtime_hours";
pub const TELEMETRY_SESSION_HOURS: &str = "session_runtime_hours";
pub const TELEMETRY_TEMPERATURE_SOURCE: &str = "temperature_source";
pub const TELEMETRY_DISPLAY_CONNECTED: &str = "display_connected";

pub const TOPIC_SENSOR_PREFIX: &str = "autoterm/sensor/";
pub const TOPIC_BRIDGE_STATE: &str = "autoterm/bridge/state";

pub const TOPIC_CMD_CLIMATE: &str = "autoterm/cmnd/climate";
pub const TOPIC_CMD_FAN: &str = "autoterm/cmnd/fan";
pub const TOPIC_CMD_SOURCE: &str = "autoterm/cmnd/source";
pub const TOPIC_CMD_PANEL_OVERRIDE: &str = "autoterm/cmnd/panel_override";
pub const TOPIC_CMD_HYSTERESIS: &str = "autoterm/cmnd/hysteresis";

pub fn sensor_topic(name: &str) -> String {
    format!("{TOPIC_SENSOR_PREFIX}{name}")
}
