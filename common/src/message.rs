//! Payload decoding and message classification.
//!
//! All decoders are pure: they take a validated [`Frame`] and return a value.

use crate::error::{Result, WireError};
use crate::frame::{msg, Frame, Origin};
use crate::types::TemperatureSource;

pub const STATUS_PAYLOAD_LEN: usize = 19;
pub const SETTINGS_PAYLOAD_LEN: usize = 6;

const HEATER_TEMP_OFFSET_C: f32 = 15.0;
const FAN_RPM_PER_UNIT: f32 = 60.0;

/// Heater telemetry from a status report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub status_code: u16,
    pub internal_temp_c: f32,
    pub external_temp_c: f32,
    pub heater_temp_c: f32,
    pub voltage_v: f32,
    pub fan_speed_set_rpm: f32,
    pub fan_speed_actual_rpm: f32,
    pub pump_frequency_hz: f32,
}

impl Status {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != STATUS_PAYLOAD_LEN {
            return Err(WireError::malformed("Status", STATUS_PAYLOAD_LEN, payload.len()));
        }
        Ok(Self {
            status_code: u16::from_be_bytes([payload[0], payload[1]]),
            internal_temp_c: payload[3] as i8 as f32,
            external_temp_c: payload[4] as i8 as f32,
            voltage_v: payload[6] as f32 / 10.0,
            heater_temp_c: payload[8] as f32 - HEATER_TEMP_OFFSET_C,
            fan_speed_set_rpm: payload[11] as f32 * FAN_RPM_PER_UNIT,
            fan_speed_actual_rpm: payload[12] as f32 * FAN_RPM_PER_UNIT,
            pump_frequency_hz: payload[14] as f32 / 100.0,
        })
    }

    /// Encode the report the heater would send. Values outside the wire
    /// ranges saturate.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![0u8; STATUS_PAYLOAD_LEN];
        payload[..2].copy_from_slice(&self.status_code.to_be_bytes());
        payload[3] = self.internal_temp_c.round() as i8 as u8;
        payload[4] = self.external_temp_c.round() as i8 as u8;
        payload[6] = (self.voltage_v * 10.0).round() as u8;
        payload[8] = (self.heater_temp_c + HEATER_TEMP_OFFSET_C).round() as u8;
        payload[11] = (self.fan_speed_set_rpm / FAN_RPM_PER_UNIT).round() as u8;
        payload[12] = (self.fan_speed_actual_rpm / FAN_RPM_PER_UNIT).round() as u8;
        payload[14] = (self.pump_frequency_hz * 100.0).round() as u8;
        payload
    }
}

/// Heater operating configuration as carried by settings frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub use_work_time: u8,
    pub work_time: u8,
    pub temperature_source: u8,
    pub set_temperature: u8,
    pub wait_mode: u8,
    pub power_level: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_work_time: 1,
            work_time: 0,
            temperature_source: TemperatureSource::Panel.as_byte(),
            set_temperature: 16,
            wait_mode: 0,
            power_level: 8,
        }
    }
}

impl Settings {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != SETTINGS_PAYLOAD_LEN {
            return Err(WireError::malformed(
                "Settings",
                SETTINGS_PAYLOAD_LEN,
                payload.len(),
            ));
        }
        Ok(Self {
            use_work_time: payload[0],
            work_time: payload[1],
            temperature_source: payload[2],
            set_temperature: payload[3],
            wait_mode: payload[4],
            power_level: payload[5],
        })
    }

    pub fn encode(&self) -> [u8; SETTINGS_PAYLOAD_LEN] {
        [
            self.use_work_time,
            self.work_time,
            self.temperature_source,
            self.set_temperature,
            self.wait_mode,
            self.power_level,
        ]
    }

    pub fn source(&self) -> Option<TemperatureSource> {
        TemperatureSource::from_byte(self.temperature_source)
    }
}

/// Decode a status report frame.
pub fn decode_status(frame: &Frame) -> Result<Status> {
    Status::decode(frame.payload())
}

/// Decode a settings-bearing frame.
pub fn decode_settings(frame: &Frame) -> Result<Settings> {
    Settings::decode(frame.payload())
}

/// Every message kind seen on the link.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    StatusRequest,
    Status(Status),
    SettingsRequest,
    /// Settings report from the heater, or a settings write from the display.
    Settings(Settings),
    /// Start command (display) or its settings echo (heater).
    Start(Settings),
    Shutdown,
    PanelTemperature(i8),
    FanOnly { level: u8 },
    /// Empty reply to a command.
    Ack { msg_id: u8 },
    Other { msg_id: u8, payload: Vec<u8> },
}

impl Message {
    pub fn decode(frame: &Frame) -> Result<Self> {
        let payload = frame.payload();
        let message = match (frame.msg_id(), payload.len()) {
            (msg::STATUS, 0) => Self::StatusRequest,
            (msg::STATUS, _) => Self::Status(decode_status(frame)?),
            (msg::SETTINGS, 0) => Self::SettingsRequest,
            (msg::SETTINGS, _) => Self::Settings(decode_settings(frame)?),
            (msg::START, 0) => Self::Ack { msg_id: msg::START },
            (msg::START, _) => Self::Start(decode_settings(frame)?),
            (msg::SHUTDOWN, _) => Self::Shutdown,
            (msg::PANEL_TEMPERATURE, 0) => Self::Ack {
                msg_id: msg::PANEL_TEMPERATURE,
            },
            (msg::PANEL_TEMPERATURE, 1) => Self::PanelTemperature(payload[0] as i8),
            (msg::PANEL_TEMPERATURE, len) => {
                return Err(WireError::malformed("PanelTemperature", 1, len))
            }
            (msg::FAN_ONLY, 0) => Self::Ack {
                msg_id: msg::FAN_ONLY,
            },
            (msg::FAN_ONLY, 4) => Self::FanOnly { level: payload[2] },
            (msg::FAN_ONLY, len) => return Err(WireError::malformed("FanOnly", 4, len)),
            (msg_id, _) => Self::Other {
                msg_id,
                payload: payload.to_vec(),
            },
        };
        Ok(message)
    }

    /// Encode as a frame from the given side of the link.
    pub fn to_frame(&self, origin: Origin) -> Result<Frame> {
        match self {
            Self::StatusRequest => Frame::new(origin, msg::STATUS, &[]),
            Self::Status(status) => Frame::new(origin, msg::STATUS, &status.encode()),
            Self::SettingsRequest => Frame::new(origin, msg::SETTINGS, &[]),
            Self::Settings(settings) => Frame::new(origin, msg::SETTINGS, &settings.encode()),
            Self::Start(settings) => Frame::new(origin, msg::START, &settings.encode()),
            Self::Shutdown => Frame::new(origin, msg::SHUTDOWN, &[]),
            Self::PanelTemperature(temp) => {
                Frame::new(origin, msg::PANEL_TEMPERATURE, &[*temp as u8])
            }
            Self::FanOnly { level } => Frame::new(origin, msg::FAN_ONLY, &[0xFF, 0xFF, *level, 0xFF]),
            Self::Ack { msg_id } => Frame::new(origin, *msg_id, &[]),
            Self::Other { msg_id, payload } => Frame::new(origin, *msg_id, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Captured heater status report: heating, 21 °C inside, -5 °C outside, 12.3 V.
    const STATUS_REPORT: [u8; 26] = [
        0xAA, 0x04, 0x13, 0x00, 0x0F, 0x03, 0x00, 0x00, 0x15, 0xFB, 0x00, 0x7B, 0x00, 0x4B, 0x00,
        0x00, 0x3C, 0x3A, 0x00, 0xA5, 0x00, 0x00, 0x00, 0x00, 0x7A, 0xEF,
    ];
    const DISPLAY_SETTINGS_WRITE: [u8; 13] = [
        0xAA, 0x03, 0x06, 0x00, 0x02, 0x01, 0x00, 0x04, 0x10, 0x00, 0x08, 0xB3, 0xDD,
    ];
    const PANEL_TEMPERATURE: [u8; 8] = [0xAA, 0x03, 0x01, 0x00, 0x11, 0x15, 0x72, 0x90];

    #[test]
    fn decodes_status_fixture() {
        let frame = Frame::parse(&STATUS_REPORT).unwrap();
        let status = decode_status(&frame).unwrap();
        assert_eq!(
            status,
            Status {
                status_code: 0x0300,
                internal_temp_c: 21.0,
                external_temp_c: -5.0,
                heater_temp_c: 60.0,
                voltage_v: 12.3,
                fan_speed_set_rpm: 3600.0,
                fan_speed_actual_rpm: 3480.0,
                pump_frequency_hz: 1.65,
            }
        );
    }

    #[test]
    fn decodes_settings_fixture() {
        let frame = Frame::parse(&DISPLAY_SETTINGS_WRITE).unwrap();
        assert_eq!(decode_settings(&frame).unwrap(), Settings::default());
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::Settings(Settings::default())
        );
    }

    #[test]
    fn status_payload_length_is_checked() {
        let frame = Frame::new(Origin::Heater, msg::STATUS, &[0x03, 0x00, 0x00]).unwrap();
        assert_eq!(
            decode_status(&frame),
            Err(WireError::MalformedPayload {
                msg_type: "Status",
                expected: STATUS_PAYLOAD_LEN,
                got: 3
            })
        );
    }

    #[test]
    fn settings_payload_length_is_checked() {
        let frame = Frame::new(Origin::Heater, msg::SETTINGS, &[1, 2, 3]).unwrap();
        assert!(matches!(
            Message::decode(&frame),
            Err(WireError::MalformedPayload { expected: 6, got: 3, .. })
        ));
    }

    #[test]
    fn status_survives_encode_decode() {
        let frame = Frame::parse(&STATUS_REPORT).unwrap();
        let status = decode_status(&frame).unwrap();
        let rebuilt = Message::Status(status).to_frame(Origin::Heater).unwrap();
        assert_eq!(rebuilt.encode(), STATUS_REPORT.to_vec());
    }

    #[test]
    fn settings_survive_encode_decode() {
        let settings = Settings {
            use_work_time: 0,
            work_time: 30,
            temperature_source: 2,
            set_temperature: 22,
            wait_mode: 1,
            power_level: 3,
        };
        let frame = Message::Start(settings).to_frame(Origin::Display).unwrap();
        let parsed = Frame::parse(&frame.encode()).unwrap();
        assert_eq!(Message::decode(&parsed).unwrap(), Message::Start(settings));
    }

    #[test]
    fn classifies_requests_and_commands() {
        let cases = [
            (msg::STATUS, vec![], Message::StatusRequest),
            (msg::SETTINGS, vec![], Message::SettingsRequest),
            (msg::SHUTDOWN, vec![], Message::Shutdown),
            (msg::FAN_ONLY, vec![0xFF, 0xFF, 0x05, 0xFF], Message::FanOnly { level: 5 }),
            (msg::START, vec![], Message::Ack { msg_id: msg::START }),
        ];
        for (msg_id, payload, expected) in cases {
            let frame = Frame::new(Origin::Display, msg_id, &payload).unwrap();
            assert_eq!(Message::decode(&frame).unwrap(), expected);
        }
    }

    #[test]
    fn panel_temperature_is_signed() {
        let frame = Frame::parse(&PANEL_TEMPERATURE).unwrap();
        assert_eq!(Message::decode(&frame).unwrap(), Message::PanelTemperature(21));

        let cold = Message::PanelTemperature(-12).to_frame(Origin::Display).unwrap();
        assert_eq!(cold.payload(), &[0xF4]);
        assert_eq!(Message::decode(&cold).unwrap(), Message::PanelTemperature(-12));
    }

    #[test]
    fn unknown_ids_are_kept_raw() {
        let frame = Frame::new(Origin::Heater, 0x1C, &[0x01]).unwrap();
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::Other {
                msg_id: 0x1C,
                payload: vec![0x01]
            }
        );
    }
}
