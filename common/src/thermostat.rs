use crate::{
    config::{clamp_hysteresis_off, clamp_hysteresis_on, ThermostatTiming},
    types::{status_is_idle, TemperatureSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatState {
    Inactive,
    Idle,
    Heating,
}

impl ThermostatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
        }
    }
}

/// Command the thermostat wants the heater to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatAction {
    Heat { level: u8 },
    Standby,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermostatConfig {
    pub target_c: f32,
    pub level: u8,
    pub source: TemperatureSource,
    pub hysteresis_on_c: f32,
    pub hysteresis_off_c: f32,
}

impl ThermostatConfig {
    pub fn start_threshold_c(&self) -> f32 {
        self.target_c - self.hysteresis_on_c
    }

    pub fn stop_threshold_c(&self) -> f32 {
        self.target_c + self.hysteresis_off_c
    }
}

/// Hysteresis controller that drives the heater between a power level and
/// standby.
#[derive(Debug, Clone)]
pub struct ThermostatController {
    timing: ThermostatTiming,
    config: Option<ThermostatConfig>,
    state: ThermostatState,

    // Set after a standby command until the heater reports it has stopped.
    waiting_for_idle: bool,

    last_sent: Option<ThermostatAction>,
    last_command_ms: Option<u64>,
    last_evaluation_ms: Option<u64>,
}

impl ThermostatController {
    pub fn new(timing: ThermostatTiming) -> Self {
        Self {
            timing,
            config: None,
            state: ThermostatState::Inactive,
            waiting_for_idle: false,
            last_sent: None,
            last_command_ms: None,
            last_evaluation_ms: None,
        }
    }

    pub fn state(&self) -> ThermostatState {
        self.state
    }

    pub fn config(&self) -> Option<&ThermostatConfig> {
        self.config.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.config.is_some()
    }

    pub fn is_waiting_for_idle(&self) -> bool {
        self.waiting_for_idle
    }

    /// Store a new configuration. Activating moves to idle; reconfiguring an
    /// active controller keeps its heating/idle state.
    pub fn configure(
        &mut self,
        target_c: f32,
        level: u8,
        source: TemperatureSource,
        hysteresis_on_c: f32,
        hysteresis_off_c: f32,
    ) {
        self.config = Some(ThermostatConfig {
            target_c,
            level,
            source,
            hysteresis_on_c: clamp_hysteresis_on(hysteresis_on_c),
            hysteresis_off_c: clamp_hysteresis_off(hysteresis_off_c),
        });
        if self.state == ThermostatState::Inactive {
            self.state = ThermostatState::Idle;
            self.waiting_for_idle = false;
            self.last_sent = None;
            self.last_command_ms = None;
        }
        self.last_evaluation_ms = None;
    }

    pub fn disable(&mut self) {
        self.config = None;
        self.state = ThermostatState::Inactive;
        self.waiting_for_idle = false;
        self.last_sent = None;
        self.last_command_ms = None;
        self.last_evaluation_ms = None;
    }

    /// Feed the latest heater status code.
    pub fn note_heater_status(&mut self, status_code: u16) {
        if self.waiting_for_idle && status_is_idle(status_code) {
            self.waiting_for_idle = false;
        }
    }

    /// Evaluate at the configured cadence. Returns a command only when it
    /// differs from the last one sent or the resend interval has passed.
    pub fn tick(&mut self, now_ms: u64, current_temp_c: f32) -> Option<ThermostatAction> {
        let config = self.config?;

        if let Some(last) = self.last_evaluation_ms {
            if now_ms.saturating_sub(last) < self.timing.evaluation_interval_ms {
                return None;
            }
        }
        self.last_evaluation_ms = Some(now_ms);

        if !current_temp_c.is_finite() {
            return None;
        }

        self.evaluate_state(&config, current_temp_c);

        let desired = match self.state {
            ThermostatState::Heating => ThermostatAction::Heat {
                level: config.level,
            },
            // Standby is only repeated once the thermostat has commanded something.
            ThermostatState::Idle if self.last_sent.is_some() => ThermostatAction::Standby,
            _ => return None,
        };

        if !self.command_due(desired, now_ms) {
            return None;
        }

        if desired == ThermostatAction::Standby
            && self.last_sent != Some(ThermostatAction::Standby)
        {
            self.waiting_for_idle = true;
        }
        self.last_sent = Some(desired);
        self.last_command_ms = Some(now_ms);
        Some(desired)
    }

    fn evaluate_state(&mut self, config: &ThermostatConfig, current_temp_c: f32) {
        match self.state {
            ThermostatState::Idle => {
                if !self.waiting_for_idle && current_temp_c <= config.start_threshold_c() {
                    self.state = ThermostatState::Heating;
                }
            }
            ThermostatState::Heating => {
                if current_temp_c >= config.stop_threshold_c() {
                    self.state = ThermostatState::Idle;
                }
            }
            ThermostatState::Inactive => {}
        }
    }

    fn command_due(&self, desired: ThermostatAction, now_ms: u64) -> bool {
        if self.last_sent != Some(desired) {
            return true;
        }
        self.last_command_ms
            .map(|last| now_ms.saturating_sub(last) >= self.timing.min_command_interval_ms)
            .unwrap_or(true)
    }
}
