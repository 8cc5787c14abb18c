use serde::{Deserialize, Serialize};

/// Sensor the heater regulates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemperatureSource {
    Internal,
    External,
    Heater,
    Panel,
}

impl TemperatureSource {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Internal => 1,
            Self::External => 2,
            Self::Heater => 3,
            Self::Panel => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Internal),
            2 => Some(Self::External),
            3 => Some(Self::Heater),
            4 => Some(Self::Panel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "Internal",
            Self::External => "External",
            Self::Heater => "Heater",
            Self::Panel => "Panel",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Internal" => Some(Self::Internal),
            "External" => Some(Self::External),
            "Heater" => Some(Self::Heater),
            "Panel" | "Manual" => Some(Self::Panel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClimateMode {
    Off,
    Heat,
    FanOnly,
    Auto,
}

impl ClimateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::FanOnly => "FAN_ONLY",
            Self::Auto => "AUTO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClimateAction {
    Off,
    Idle,
    Heating,
    Fan,
}

impl ClimateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
            Self::Fan => "FAN",
        }
    }
}

/// Operating presets offered alongside the climate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClimatePreset {
    #[serde(rename = "Power")]
    Power,
    #[serde(rename = "Heat")]
    Heat,
    #[serde(rename = "Heat+Vent")]
    HeatAndVent,
    #[serde(rename = "Thermostat")]
    Thermostat,
}

impl ClimatePreset {
    pub const ALL: [Self; 4] = [Self::Power, Self::Heat, Self::HeatAndVent, Self::Thermostat];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Power => "Power",
            Self::Heat => "Heat",
            Self::HeatAndVent => "Heat+Vent",
            Self::Thermostat => "Thermostat",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.as_str() == label)
    }
}

/// Human readable text for a heater status code.
pub fn status_text(code: u16) -> String {
    let text = match code {
        0x0000 => "Heater off",
        0x0001 => "Standby",
        0x0100 => "Cooling flame sensor",
        0x0101 => "Ventilation",
        0x0200 => "Starting",
        0x0201 => "Heating glow plug",
        0x0202 => "Ignition 1",
        0x0203 => "Ignition 2",
        0x0204 => "Heating combustion chamber",
        0x0300 => "Heating",
        0x0323 => "Only fan",
        0x0304 => "Cooling down",
        0x0400 => "Shutting down",
        other => return format!("Unknown (0x{other:04X})"),
    };
    text.to_string()
}

/// Heater is fully stopped and will accept a start command.
pub fn status_is_idle(code: u16) -> bool {
    matches!(code, 0x0000 | 0x0001)
}

/// Heater is burning fuel; counts towards operating hours.
pub fn status_is_burning(code: u16) -> bool {
    matches!(code, 0x0200..=0x0204 | 0x0300)
}

/// Everything the host exposes about the bridge at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSnapshot {
    #[serde(rename = "displayConnected")]
    pub display_connected: bool,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    #[serde(rename = "statusText")]
    pub status_text: Option<String>,
    #[serde(rename = "internalTemp")]
    pub internal_temp_c: Option<f32>,
    #[serde(rename = "externalTemp")]
    pub external_temp_c: Option<f32>,
    #[serde(rename = "heaterTemp")]
    pub heater_temp_c: Option<f32>,
    #[serde(rename = "panelTemp")]
    pub panel_temp_c: Option<f32>,
    pub voltage: Option<f32>,
    #[serde(rename = "temperatureSource")]
    pub temperature_source: TemperatureSource,
    #[serde(rename = "manualSource")]
    pub manual_source: Option<TemperatureSource>,
    pub mode: ClimateMode,
    pub preset: ClimatePreset,
    pub action: ClimateAction,
    #[serde(rename = "fanLevel")]
    pub fan_level: u8,
    #[serde(rename = "fanMode")]
    pub fan_mode: String,
    #[serde(rename = "targetTemp")]
    pub target_temp_c: f32,
    #[serde(rename = "thermostatActive")]
    pub thermostat_active: bool,
    #[serde(rename = "thermostatHeating")]
    pub thermostat_heating: bool,
    /// Standby was sent and the heater has not yet reported idle.
    #[serde(rename = "thermostatWaiting")]
    pub thermostat_waiting: bool,
    #[serde(rename = "hysteresisOn")]
    pub hysteresis_on_c: f32,
    #[serde(rename = "hysteresisOff")]
    pub hysteresis_off_c: f32,
    #[serde(rename = "runtimeHours")]
    pub runtime_hours: f32,
    #[serde(rename = "sessionHours")]
    pub session_hours: f32,
}
