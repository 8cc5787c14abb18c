//! The relay orchestrator.
//!
//! One [`Bridge`] owns both serial ports and every piece of mutable state.
//! The host calls [`Bridge::tick`] periodically; within a tick the work runs
//! in a fixed order:
//!
//! 1. forward and sniff display → heater traffic
//! 2. forward and sniff heater → display traffic
//! 3. apply pending command intents
//! 4. presence evaluation and autonomous requests
//! 5. runtime accounting
//! 6. thermostat evaluation
//! 7. write queued commands to the heater
//!
//! Nothing here blocks and no error stops the relay path.

use std::collections::VecDeque;
use std::io;

use tracing::{debug, info, warn};

use crate::{
    assembler::FrameAssembler,
    autonomous::{AutonomousController, ConnectionState, PresenceChange},
    climate::{fan_mode_label, resolve_temp_source, ClimateCommand, ClimateTranslator},
    config::BridgeConfig,
    error::{BridgeError, Link},
    frame::{Frame, Origin},
    message::{Message, Settings, Status},
    ports::{BytePort, CommandIntentSource, CounterStore, Intent, TelemetrySink},
    runtime::RuntimeCounters,
    telemetry::Publisher,
    thermostat::{ThermostatAction, ThermostatController, ThermostatState},
    topics::*,
    types::{status_is_idle, status_text, BridgeSnapshot, TemperatureSource},
};

const READ_CHUNK: usize = 256;
const MAX_READS_PER_TICK: usize = 16;

/// Wait mode values carried in settings frames.
const WAIT_MODE_TO_FAN: u8 = 1;
const WAIT_MODE_HOLD: u8 = 2;

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub forwarded_to_heater: usize,
    pub forwarded_to_display: usize,
    pub frames_decoded: usize,
    pub frames_rejected: usize,
    pub frames_sent: usize,
    pub failures: Vec<BridgeError>,
}

pub struct Bridge<H, D, T, C> {
    heater: H,
    display: Option<D>,
    sink: T,
    store: C,

    from_display: FrameAssembler,
    from_heater: FrameAssembler,
    connection: ConnectionState,
    autonomous: AutonomousController,

    settings: Option<Settings>,
    status: Option<Status>,
    panel_temp_c: Option<f32>,
    panel_override_c: Option<f32>,
    manual_source: Option<TemperatureSource>,

    climate: ClimateTranslator,
    thermostat: ThermostatController,
    runtime: RuntimeCounters,
    publisher: Publisher,

    outbound: VecDeque<Message>,
}

impl<H, D, T, C> Bridge<H, D, T, C>
where
    H: BytePort,
    D: BytePort,
    T: TelemetrySink,
    C: CounterStore,
{
    /// `display` is `None` when no display is wired; the bridge then runs
    /// autonomously for its whole lifetime.
    pub fn new(config: &BridgeConfig, heater: H, display: Option<D>, sink: T, store: C) -> Self {
        Self {
            heater,
            display,
            sink,
            store,
            from_display: FrameAssembler::new(),
            from_heater: FrameAssembler::new(),
            connection: ConnectionState::default(),
            autonomous: AutonomousController::new(config.timing.clone()),
            settings: None,
            status: None,
            panel_temp_c: None,
            panel_override_c: None,
            manual_source: None,
            climate: ClimateTranslator::new(config.climate.clone()),
            thermostat: ThermostatController::new(config.thermostat.clone()),
            runtime: RuntimeCounters::new(
                config.timing.runtime_save_interval_ms,
                config.timing.status_stale_ms,
            ),
            publisher: Publisher::new(),
            outbound: VecDeque::new(),
        }
    }

    /// Restore counters, publish the initial values and ask the heater for its
    /// settings.
    pub fn start(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if let Err(err) = self.runtime.load(&mut self.store) {
            report.failures.push(err);
        }
        self.publish_runtime(true);
        self.publisher
            .value(&mut self.sink, TELEMETRY_DISPLAY_CONNECTED, 0.0, true);
        let source = self.effective_source();
        self.publisher
            .text(&mut self.sink, TELEMETRY_TEMPERATURE_SOURCE, source.as_str(), true);

        self.outbound.push_back(Message::SettingsRequest);
        self.flush(&mut report);

        info!(
            "Bridge started ({})",
            if self.display.is_some() {
                "display port configured"
            } else {
                "no display port, autonomous"
            }
        );
        report
    }

    pub fn tick(&mut self, now_ms: u64, intents: &mut impl CommandIntentSource) -> TickReport {
        let mut report = TickReport::default();

        self.relay_from_display(now_ms, &mut report);
        self.relay_from_heater(now_ms, &mut report);

        while let Some(intent) = intents.next_intent() {
            self.apply_intent(intent);
        }

        let display_configured = self.display.is_some();
        if let Some(change) =
            self.autonomous
                .update_presence(&mut self.connection, display_configured, now_ms)
        {
            let connected = if change == PresenceChange::Connected { 1.0 } else { 0.0 };
            self.publisher
                .value(&mut self.sink, TELEMETRY_DISPLAY_CONNECTED, connected, false);
        }
        let due = self
            .autonomous
            .due(&mut self.connection, now_ms, self.panel_override_c);
        self.outbound.extend(due);

        self.runtime.advance(now_ms);
        self.publish_runtime(false);
        if let Err(err) = self.runtime.maybe_save(now_ms, &mut self.store) {
            warn!("Saving runtime counter failed: {}", err);
            report.failures.push(err);
        }

        self.evaluate_thermostat(now_ms);
        self.flush(&mut report);
        report
    }

    /// Apply one request from the UI side. Resulting frames go out at the end
    /// of the current tick.
    pub fn apply_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Climate(call) => {
                let source = self.effective_source();
                let command = self.climate.control(&call, source);
                self.execute(command);
            }
            Intent::FanLevel(level) => {
                let command = self.climate.fan_only(level);
                self.execute(command);
            }
            Intent::TemperatureSource(source) => {
                self.manual_source = source;
                let effective = self.effective_source();
                info!("Temperature source now {}", effective.as_str());
                self.publisher.text(
                    &mut self.sink,
                    TELEMETRY_TEMPERATURE_SOURCE,
                    effective.as_str(),
                    false,
                );
            }
            Intent::PanelOverride(value) => {
                self.panel_override_c = value.filter(|temp| temp.is_finite());
            }
            Intent::Hysteresis { on_c, off_c } => {
                if !self.climate.set_hysteresis(on_c, off_c) {
                    return;
                }
                let state = self.climate.state();
                let (on_c, off_c) = (state.hysteresis_on_c, state.hysteresis_off_c);
                info!("Hysteresis now -{:.1}/+{:.1}°C", on_c, off_c);
                if let Some(config) = self.thermostat.config().copied() {
                    self.thermostat
                        .configure(config.target_c, config.level, config.source, on_c, off_c);
                }
            }
        }
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        let climate = self.climate.state();
        BridgeSnapshot {
            display_connected: self.connection.display_present,
            status_code: self.status.map(|status| status.status_code),
            status_text: self.status.map(|status| status_text(status.status_code)),
            internal_temp_c: self.status.map(|status| status.internal_temp_c),
            external_temp_c: self.status.map(|status| status.external_temp_c),
            heater_temp_c: self.status.map(|status| status.heater_temp_c),
            panel_temp_c: self.panel_temp_c,
            voltage: self.status.map(|status| status.voltage_v),
            temperature_source: self.effective_source(),
            manual_source: self.manual_source,
            mode: climate.mode,
            preset: climate.preset,
            action: climate.action,
            fan_level: climate.fan_level,
            fan_mode: fan_mode_label(climate.fan_level),
            target_temp_c: climate.target_temp_c,
            thermostat_active: self.thermostat.is_active(),
            thermostat_heating: self.thermostat.state() == ThermostatState::Heating,
            thermostat_waiting: self.thermostat.is_waiting_for_idle(),
            hysteresis_on_c: climate.hysteresis_on_c,
            hysteresis_off_c: climate.hysteresis_off_c,
            runtime_hours: self.runtime.total_hours(),
            session_hours: self.runtime.session_hours(),
        }
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn thermostat(&self) -> &ThermostatController {
        &self.thermostat
    }

    pub fn climate(&self) -> &ClimateTranslator {
        &self.climate
    }

    pub fn runtime(&self) -> &RuntimeCounters {
        &self.runtime
    }

    fn relay_from_display(&mut self, now_ms: u64, report: &mut TickReport) {
        let Some(display) = self.display.as_mut() else {
            return;
        };
        report.forwarded_to_heater += pump(
            Link::Display,
            display,
            Some(&mut self.heater),
            &mut self.from_display,
            &mut report.failures,
        );

        while let Some(candidate) = self.from_display.next_frame() {
            // Framed traffic proves the display is alive even if it fails to verify.
            self.connection.last_display_activity_ms = Some(now_ms);
            if let Some(message) = sniff(Link::Display, &candidate, report) {
                self.on_display_message(message);
            }
        }
    }

    fn relay_from_heater(&mut self, now_ms: u64, report: &mut TickReport) {
        report.forwarded_to_display += pump(
            Link::Heater,
            &mut self.heater,
            self.display.as_mut(),
            &mut self.from_heater,
            &mut report.failures,
        );

        while let Some(candidate) = self.from_heater.next_frame() {
            if let Some(message) = sniff(Link::Heater, &candidate, report) {
                self.on_heater_message(now_ms, message);
            }
        }
    }

    fn on_display_message(&mut self, message: Message) {
        match message {
            Message::Settings(settings) | Message::Start(settings) => {
                self.store_settings(settings);
                if self.climate.handle_settings_update(&settings) {
                    debug!("Climate state follows panel settings");
                }
                if self.thermostat.is_active() {
                    info!("Panel changed settings, thermostat disabled");
                    self.thermostat.disable();
                }
            }
            Message::Shutdown => {
                if self.thermostat.is_active() {
                    info!("Panel shut the heater down, thermostat disabled");
                    self.thermostat.disable();
                }
                self.climate.set_off();
            }
            Message::PanelTemperature(temp) => {
                self.panel_temp_c = Some(temp as f32);
                self.publisher
                    .value(&mut self.sink, TELEMETRY_PANEL_TEMP, temp as f32, false);
            }
            Message::FanOnly { level } => {
                self.thermostat.disable();
                self.climate.fan_only(level as i32);
            }
            _ => {}
        }
    }

    fn on_heater_message(&mut self, now_ms: u64, message: Message) {
        match message {
            Message::Settings(settings) | Message::Start(settings) => {
                self.store_settings(settings);
            }
            Message::Status(status) => {
                self.status = Some(status);
                self.runtime.note_status(now_ms, status.status_code);
                self.publish_status(&status);
                let current = self.temperature_for(self.effective_source());
                self.climate
                    .handle_status_update(status.status_code, current);
                self.thermostat.note_heater_status(status.status_code);
            }
            _ => {}
        }
    }

    fn store_settings(&mut self, settings: Settings) {
        self.settings = Some(settings);
        let source = self.effective_source();
        self.publisher
            .text(&mut self.sink, TELEMETRY_TEMPERATURE_SOURCE, source.as_str(), false);
    }

    fn publish_status(&mut self, status: &Status) {
        let values = [
            (TELEMETRY_STATUS_CODE, status.status_code as f32),
            (TELEMETRY_INTERNAL_TEMP, status.internal_temp_c),
            (TELEMETRY_EXTERNAL_TEMP, status.external_temp_c),
            (TELEMETRY_HEATER_TEMP, status.heater_temp_c),
            (TELEMETRY_VOLTAGE, status.voltage_v),
            (TELEMETRY_FAN_SPEED_SET, status.fan_speed_set_rpm),
            (TELEMETRY_FAN_SPEED_ACTUAL, status.fan_speed_actual_rpm),
            (TELEMETRY_PUMP_FREQUENCY, status.pump_frequency_hz),
        ];
        for (name, value) in values {
            self.publisher.value(&mut self.sink, name, value, false);
        }
        self.publisher.text(
            &mut self.sink,
            TELEMETRY_STATUS_TEXT,
            &status_text(status.status_code),
            false,
        );
    }

    fn publish_runtime(&mut self, force: bool) {
        let update = self.runtime.pending_publish(force);
        if let Some(hours) = update.total_hours {
            self.publisher
                .value(&mut self.sink, TELEMETRY_RUNTIME_HOURS, hours, force);
        }
        if let Some(hours) = update.session_hours {
            self.publisher
                .value(&mut self.sink, TELEMETRY_SESSION_HOURS, hours, force);
        }
    }

    fn effective_source(&self) -> TemperatureSource {
        resolve_temp_source(
            self.manual_source,
            self.settings.as_ref(),
            self.climate.defaults().temp_source,
        )
    }

    fn temperature_for(&self, source: TemperatureSource) -> Option<f32> {
        match source {
            TemperatureSource::Internal => self.status.map(|status| status.internal_temp_c),
            TemperatureSource::External => self.status.map(|status| status.external_temp_c),
            TemperatureSource::Heater => self.status.map(|status| status.heater_temp_c),
            TemperatureSource::Panel => self.panel_override_c.or(self.panel_temp_c),
        }
    }

    fn execute(&mut self, command: ClimateCommand) {
        debug!("Climate command: {}", command.as_str());
        if let ClimateCommand::Thermostat {
            target_c,
            level,
            source,
            hysteresis_on_c,
            hysteresis_off_c,
        } = command
        {
            info!(
                "Thermostat configured: target {:.1}°C, level {}, source {}",
                target_c,
                level,
                source.as_str()
            );
            self.thermostat
                .configure(target_c, level, source, hysteresis_on_c, hysteresis_off_c);
            return;
        }

        if self.thermostat.is_active() {
            info!("Manual command, thermostat disabled");
            self.thermostat.disable();
        }

        let base = self.settings.unwrap_or_default();
        let message = match command {
            ClimateCommand::Standby => Message::Shutdown,
            ClimateCommand::PowerMode { level } => self.settings_command(Settings {
                temperature_source: TemperatureSource::Panel.as_byte(),
                power_level: level,
                ..base
            }),
            ClimateCommand::TemperatureHold { source, temp_c } => {
                self.settings_command(Settings {
                    temperature_source: source.as_byte(),
                    set_temperature: temp_c,
                    wait_mode: WAIT_MODE_HOLD,
                    ..base
                })
            }
            ClimateCommand::TemperatureToFan { source, temp_c } => {
                self.settings_command(Settings {
                    temperature_source: source.as_byte(),
                    set_temperature: temp_c,
                    wait_mode: WAIT_MODE_TO_FAN,
                    ..base
                })
            }
            ClimateCommand::FanOnly { level } => Message::FanOnly { level },
            ClimateCommand::Thermostat { .. } => return,
        };
        self.outbound.push_back(message);
    }

    /// A stopped heater needs a start command; a running one takes a settings
    /// write.
    fn settings_command(&self, settings: Settings) -> Message {
        match self.status {
            Some(status) if !status_is_idle(status.status_code) => Message::Settings(settings),
            _ => Message::Start(settings),
        }
    }

    fn evaluate_thermostat(&mut self, now_ms: u64) {
        let Some(source) = self.thermostat.config().map(|config| config.source) else {
            return;
        };
        let current = self.temperature_for(source).unwrap_or(f32::NAN);
        let Some(action) = self.thermostat.tick(now_ms, current) else {
            return;
        };

        info!(
            "Thermostat {} at {:.1}°C",
            self.thermostat.state().as_str(),
            current
        );
        let message = match action {
            ThermostatAction::Heat { level } => {
                let base = self.settings.unwrap_or_default();
                self.settings_command(Settings {
                    temperature_source: TemperatureSource::Panel.as_byte(),
                    power_level: level,
                    ..base
                })
            }
            ThermostatAction::Standby => Message::Shutdown,
        };
        self.outbound.push_back(message);
    }

    /// Write queued frames to the heater, unless the display is halfway
    /// through a frame of its own.
    fn flush(&mut self, report: &mut TickReport) {
        if self.outbound.is_empty() {
            return;
        }
        if self.connection.display_present && self.from_display.is_mid_frame() {
            debug!("Display mid-frame, deferring {} frame(s)", self.outbound.len());
            return;
        }

        while let Some(message) = self.outbound.pop_front() {
            let frame = match message.to_frame(Origin::Display) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Dropping outbound {:?}: {}", message, err);
                    report.failures.push(err.into());
                    continue;
                }
            };
            match self.heater.write_bytes(&frame.encode()) {
                Ok(()) => report.frames_sent += 1,
                Err(source) => {
                    warn!("Write to heater failed: {}", source);
                    report.failures.push(BridgeError::Write {
                        link: Link::Heater,
                        source,
                    });
                }
            }
        }
    }
}

/// Forward everything readable from `source` to `forward_to`, feeding the bytes to
/// the assembler after they have been passed on.
fn pump<S: BytePort, W: BytePort>(
    link: Link,
    source: &mut S,
    mut forward_to: Option<&mut W>,
    assembler: &mut FrameAssembler,
    failures: &mut Vec<BridgeError>,
) -> usize {
    let peer = match link {
        Link::Display => Link::Heater,
        Link::Heater => Link::Display,
    };
    let mut buf = [0u8; READ_CHUNK];
    let mut total = 0;

    for _ in 0..MAX_READS_PER_TICK {
        let n = match source.read_available(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if is_transient(&err) => break,
            Err(err) => {
                failures.push(BridgeError::Read { link, source: err });
                break;
            }
        };
        if let Some(port) = forward_to.as_deref_mut() {
            if let Err(err) = port.write_bytes(&buf[..n]) {
                warn!("Forwarding to {} failed: {}", peer.as_str(), err);
                failures.push(BridgeError::Write {
                    link: peer,
                    source: err,
                });
            }
        }
        assembler.feed(&buf[..n]);
        total += n;
    }
    total
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn sniff(link: Link, candidate: &[u8], report: &mut TickReport) -> Option<Message> {
    let decoded = Frame::parse(candidate).and_then(|frame| Message::decode(&frame));
    match decoded {
        Ok(message) => {
            report.frames_decoded += 1;
            Some(message)
        }
        Err(err) => {
            debug!("Discarding {} frame: {}", link.as_str(), err);
            report.frames_rejected += 1;
            None
        }
    }
}
