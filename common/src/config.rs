use serde::{Deserialize, Serialize};

use crate::types::TemperatureSource;

pub const HYSTERESIS_ON_RANGE: (f32, f32) = (1.0, 5.0);
pub const HYSTERESIS_OFF_RANGE: (f32, f32) = (0.0, 2.0);
pub const MAX_FAN_LEVEL: u8 = 9;
pub const TARGET_TEMP_RANGE: (f32, f32) = (0.0, 30.0);

/// Cadences of the relay and autonomous mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeTiming {
    pub presence_timeout_ms: u64,
    pub status_request_interval_ms: u64,
    pub settings_request_interval_ms: u64,
    pub panel_override_interval_ms: u64,
    pub runtime_save_interval_ms: u64,
    /// How long a burning status report keeps the runtime counter running.
    pub status_stale_ms: u64,
}

impl Default for BridgeTiming {
    fn default() -> Self {
        Self {
            presence_timeout_ms: 5_000,
            status_request_interval_ms: 2_000,
            settings_request_interval_ms: 10_000,
            panel_override_interval_ms: 1_000,
            runtime_save_interval_ms: 60_000,
            status_stale_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatTiming {
    pub evaluation_interval_ms: u64,
    pub min_command_interval_ms: u64,
}

impl Default for ThermostatTiming {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: 5_000,
            min_command_interval_ms: 60_000,
        }
    }
}

/// Per-install defaults for the climate surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateDefaults {
    pub temp_source: TemperatureSource,
    pub fan_level: u8,
    pub target_temp_c: f32,
    pub hysteresis_on_c: f32,
    pub hysteresis_off_c: f32,
}

impl Default for ClimateDefaults {
    fn default() -> Self {
        Self {
            temp_source: TemperatureSource::Internal,
            fan_level: 4,
            target_temp_c: 20.0,
            hysteresis_on_c: 2.0,
            hysteresis_off_c: 1.0,
        }
    }
}

impl ClimateDefaults {
    pub fn sanitize(&mut self) {
        self.fan_level = self.fan_level.min(MAX_FAN_LEVEL);
        self.target_temp_c = clamp_target_temp(self.target_temp_c);
        self.hysteresis_on_c = clamp_hysteresis_on(self.hysteresis_on_c);
        self.hysteresis_off_c = clamp_hysteresis_off(self.hysteresis_off_c);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub heater_port: String,
    /// No display attached when unset; the bridge runs autonomously.
    pub display_port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            heater_port: "/dev/ttyUSB0".to_string(),
            display_port: Some("/dev/ttyUSB1".to_string()),
            baud_rate: 9_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub http_port: Option<u16>,
    pub timing: BridgeTiming,
    pub thermostat: ThermostatTiming,
    pub climate: ClimateDefaults,
}

impl BridgeConfig {
    pub fn sanitize(&mut self) {
        self.climate.sanitize();
        if self.serial.baud_rate == 0 {
            self.serial.baud_rate = SerialConfig::default().baud_rate;
        }
        if self
            .serial
            .display_port
            .as_deref()
            .is_some_and(|port| port.trim().is_empty())
        {
            self.serial.display_port = None;
        }
        self.timing.presence_timeout_ms = self.timing.presence_timeout_ms.max(1);
    }
}

pub fn clamp_hysteresis_on(value: f32) -> f32 {
    clamp_finite(value, HYSTERESIS_ON_RANGE, 2.0)
}

pub fn clamp_hysteresis_off(value: f32) -> f32 {
    clamp_finite(value, HYSTERESIS_OFF_RANGE, 1.0)
}

pub fn clamp_target_temp(value: f32) -> f32 {
    clamp_finite(value, TARGET_TEMP_RANGE, 20.0)
}

pub fn clamp_fan_level(level: i32) -> u8 {
    level.clamp(0, MAX_FAN_LEVEL as i32) as u8
}

fn clamp_finite(value: f32, (min, max): (f32, f32), fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
