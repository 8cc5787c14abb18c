//! Mapping from climate requests to heater commands, and the climate state
//! derived from sniffed traffic.

use serde::Deserialize;
use tracing::debug;

use crate::{
    config::{
        clamp_fan_level, clamp_hysteresis_off, clamp_hysteresis_on, clamp_target_temp,
        ClimateDefaults, MAX_FAN_LEVEL,
    },
    message::Settings,
    types::{ClimateAction, ClimateMode, ClimatePreset, TemperatureSource},
};

const CURRENT_TEMP_EPSILON: f32 = 0.01;
const FAN_MODE_PREFIX: &str = "Level ";

/// A climate request as it arrives from the UI side. Missing fields keep the
/// current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClimateCall {
    pub mode: Option<ClimateMode>,
    pub preset: Option<String>,
    pub fan_level: Option<i32>,
    /// `Level N` label, used when `fan_level` is absent.
    pub fan_mode: Option<String>,
    #[serde(rename = "targetTemp")]
    pub target_temp_c: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClimateCommand {
    Standby,
    PowerMode {
        level: u8,
    },
    TemperatureHold {
        source: TemperatureSource,
        temp_c: u8,
    },
    TemperatureToFan {
        source: TemperatureSource,
        temp_c: u8,
    },
    FanOnly {
        level: u8,
    },
    Thermostat {
        target_c: f32,
        level: u8,
        source: TemperatureSource,
        hysteresis_on_c: f32,
        hysteresis_off_c: f32,
    },
}

impl ClimateCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standby => "standby",
            Self::PowerMode { .. } => "power-mode",
            Self::TemperatureHold { .. } => "temperature-hold",
            Self::TemperatureToFan { .. } => "temperature-to-fan",
            Self::FanOnly { .. } => "fan-only",
            Self::Thermostat { .. } => "thermostat",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateState {
    pub mode: ClimateMode,
    pub preset: ClimatePreset,
    pub fan_level: u8,
    pub target_temp_c: f32,
    pub current_temp_c: Option<f32>,
    pub action: ClimateAction,
    /// Thermostat band below and above the target.
    pub hysteresis_on_c: f32,
    pub hysteresis_off_c: f32,
}

#[derive(Debug, Clone)]
pub struct ClimateTranslator {
    defaults: ClimateDefaults,
    state: ClimateState,
}

impl ClimateTranslator {
    pub fn new(defaults: ClimateDefaults) -> Self {
        let state = ClimateState {
            mode: ClimateMode::Off,
            preset: ClimatePreset::Heat,
            fan_level: defaults.fan_level.min(MAX_FAN_LEVEL),
            target_temp_c: clamp_target_temp(defaults.target_temp_c),
            current_temp_c: None,
            action: ClimateAction::Off,
            hysteresis_on_c: clamp_hysteresis_on(defaults.hysteresis_on_c),
            hysteresis_off_c: clamp_hysteresis_off(defaults.hysteresis_off_c),
        };
        Self { defaults, state }
    }

    pub fn state(&self) -> &ClimateState {
        &self.state
    }

    pub fn defaults(&self) -> &ClimateDefaults {
        &self.defaults
    }

    /// Work out the command for `call` without touching the current state.
    pub fn translate(
        &self,
        call: &ClimateCall,
        source: TemperatureSource,
    ) -> (ClimateCommand, ClimateState) {
        let mut next = self.state.clone();

        if let Some(mode) = call.mode {
            next.mode = mode;
        }
        if let Some(label) = call.preset.as_deref() {
            match ClimatePreset::from_label(label) {
                Some(preset) => next.preset = preset,
                None => debug!(
                    "Ignoring unknown preset {:?}, keeping {}",
                    label,
                    next.preset.as_str()
                ),
            }
        }
        if let Some(level) = call.fan_level {
            next.fan_level = clamp_fan_level(level);
        } else if let Some(label) = call.fan_mode.as_deref() {
            match parse_fan_mode_label(label) {
                Some(level) => next.fan_level = level,
                None => debug!("Ignoring malformed fan mode {:?}", label),
            }
        }
        if let Some(target) = call.target_temp_c {
            next.target_temp_c = clamp_target_temp(target);
        }

        let temp_c = next.target_temp_c.round() as u8;
        let command = match next.mode {
            ClimateMode::Off => {
                next.action = ClimateAction::Off;
                ClimateCommand::Standby
            }
            ClimateMode::FanOnly => {
                next.action = ClimateAction::Fan;
                ClimateCommand::FanOnly {
                    level: next.fan_level,
                }
            }
            ClimateMode::Heat | ClimateMode::Auto => match next.preset {
                ClimatePreset::Power => {
                    next.action = ClimateAction::Heating;
                    ClimateCommand::PowerMode {
                        level: next.fan_level,
                    }
                }
                ClimatePreset::Heat => {
                    next.mode = ClimateMode::Heat;
                    next.action = ClimateAction::Heating;
                    ClimateCommand::TemperatureHold { source, temp_c }
                }
                ClimatePreset::HeatAndVent => {
                    next.mode = ClimateMode::Auto;
                    next.action = ClimateAction::Heating;
                    ClimateCommand::TemperatureToFan { source, temp_c }
                }
                ClimatePreset::Thermostat => {
                    next.mode = ClimateMode::Auto;
                    next.action = ClimateAction::Heating;
                    ClimateCommand::Thermostat {
                        target_c: next.target_temp_c,
                        level: next.fan_level,
                        source,
                        hysteresis_on_c: next.hysteresis_on_c,
                        hysteresis_off_c: next.hysteresis_off_c,
                    }
                }
            },
        };

        (command, next)
    }

    /// Translate and adopt the resulting state.
    pub fn control(&mut self, call: &ClimateCall, source: TemperatureSource) -> ClimateCommand {
        let (command, next) = self.translate(call, source);
        self.state = next;
        command
    }

    pub fn fan_only(&mut self, level: i32) -> ClimateCommand {
        self.state.fan_level = clamp_fan_level(level);
        self.state.mode = ClimateMode::FanOnly;
        self.state.action = ClimateAction::Fan;
        ClimateCommand::FanOnly {
            level: self.state.fan_level,
        }
    }

    /// Adjust the thermostat band; missing or non-finite values keep the
    /// current setting. Returns true when either side changed.
    pub fn set_hysteresis(&mut self, on_c: Option<f32>, off_c: Option<f32>) -> bool {
        let before = (self.state.hysteresis_on_c, self.state.hysteresis_off_c);
        if let Some(on) = on_c.filter(|value| value.is_finite()) {
            self.state.hysteresis_on_c = clamp_hysteresis_on(on);
        }
        if let Some(off) = off_c.filter(|value| value.is_finite()) {
            self.state.hysteresis_off_c = clamp_hysteresis_off(off);
        }
        before != (self.state.hysteresis_on_c, self.state.hysteresis_off_c)
    }

    /// Used when the panel switches the heater off.
    pub fn set_off(&mut self) {
        self.state.mode = ClimateMode::Off;
        self.state.action = ClimateAction::Off;
    }

    /// Fold a heater status report into the action and current temperature.
    /// Returns true when anything visible changed.
    pub fn handle_status_update(&mut self, status_code: u16, current_temp_c: Option<f32>) -> bool {
        let action = match status_code {
            0x0000 | 0x0001 if self.state.mode == ClimateMode::Off => ClimateAction::Off,
            0x0000 | 0x0001 => ClimateAction::Idle,
            0x0101 | 0x0323 => ClimateAction::Fan,
            0x0200..=0x0204 | 0x0300 => ClimateAction::Heating,
            0x0304 | 0x0400 => ClimateAction::Idle,
            _ => match self.state.mode {
                ClimateMode::Off => ClimateAction::Off,
                ClimateMode::FanOnly => ClimateAction::Fan,
                ClimateMode::Heat | ClimateMode::Auto => ClimateAction::Idle,
            },
        };

        let mut changed = action != self.state.action;
        self.state.action = action;

        let current = current_temp_c.filter(|temp| temp.is_finite());
        let temp_changed = match (self.state.current_temp_c, current) {
            (Some(old), Some(new)) => (old - new).abs() > CURRENT_TEMP_EPSILON,
            (None, None) => false,
            _ => true,
        };
        if temp_changed {
            self.state.current_temp_c = current;
            changed = true;
        }
        changed
    }

    /// Deduce mode and preset from settings the panel wrote.
    pub fn handle_settings_update(&mut self, settings: &Settings) -> bool {
        let before = self.state.clone();
        let power_source = settings.temperature_source == TemperatureSource::Panel.as_byte();

        self.state.mode = if settings.wait_mode == 0 && settings.power_level == 0 {
            ClimateMode::Off
        } else if power_source {
            ClimateMode::Heat
        } else {
            match settings.wait_mode {
                1 => ClimateMode::Auto,
                2 => ClimateMode::Heat,
                _ => self.state.mode,
            }
        };

        if power_source {
            self.state.preset = ClimatePreset::Power;
        } else {
            match settings.wait_mode {
                1 => self.state.preset = ClimatePreset::HeatAndVent,
                2 => self.state.preset = ClimatePreset::Heat,
                _ => {}
            }
        }
        self.state.target_temp_c = clamp_target_temp(settings.set_temperature as f32);
        self.state.fan_level = settings.power_level.min(MAX_FAN_LEVEL);

        if self.state.mode == ClimateMode::Off {
            self.state.action = ClimateAction::Off;
        }

        self.state != before
    }
}

/// Sensor precedence: manual override, then the heater settings, then the
/// install default.
pub fn resolve_temp_source(
    manual: Option<TemperatureSource>,
    settings: Option<&Settings>,
    default: TemperatureSource,
) -> TemperatureSource {
    manual
        .or_else(|| settings.and_then(Settings::source))
        .unwrap_or(default)
}

pub fn fan_mode_label(level: u8) -> String {
    format!("{FAN_MODE_PREFIX}{level}")
}

pub fn parse_fan_mode_label(label: &str) -> Option<u8> {
    label
        .strip_prefix(FAN_MODE_PREFIX)?
        .trim()
        .parse::<i32>()
        .ok()
        .map(clamp_fan_level)
}
