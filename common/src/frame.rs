//! Frame encoding, validation and checksum.
//!
//! Wire format:
//! ```text
//! AA ORIGIN LEN 00 MSG PAYLOAD... CRC_HI CRC_LO
//! ```
//!
//! The checksum is CRC-16/MODBUS over every byte before it, sent high byte first.

use crate::error::{Result, WireError};

pub const SYNC: u8 = 0xAA;
pub const RESERVED: u8 = 0x00;
pub const HEADER_LEN: usize = 5;
pub const CHECKSUM_LEN: usize = 2;
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Message ids used on the link.
pub mod msg {
    pub const START: u8 = 0x01;
    pub const SETTINGS: u8 = 0x02;
    pub const SHUTDOWN: u8 = 0x03;
    pub const STATUS: u8 = 0x0F;
    pub const PANEL_TEMPERATURE: u8 = 0x11;
    pub const FAN_ONLY: u8 = 0x23;
}

/// Which side of the link produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Display,
    Heater,
}

impl Origin {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Display => 0x03,
            Self::Heater => 0x04,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::Display),
            0x04 => Some(Self::Heater),
            _ => None,
        }
    }
}

/// A validated frame with its header fields split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    origin: Origin,
    msg_id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a display-originated frame, the only kind the bridge ever injects.
    pub fn build(msg_id: u8, payload: &[u8]) -> Result<Self> {
        Self::new(Origin::Display, msg_id, payload)
    }

    pub fn new(origin: Origin, msg_id: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge { len: payload.len() });
        }
        Ok(Self {
            origin,
            msg_id,
            payload: payload.to_vec(),
        })
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn msg_id(&self) -> u8 {
        self.msg_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Parse a single complete wire frame, checksum included.
    pub fn parse(wire: &[u8]) -> Result<Self> {
        if wire.len() < MIN_FRAME_LEN {
            return Err(WireError::FrameTooShort { len: wire.len() });
        }
        if wire[0] != SYNC {
            return Err(WireError::SyncMismatch {
                offset: 0,
                got: wire[0],
            });
        }
        let origin = Origin::from_byte(wire[1]).ok_or(WireError::SyncMismatch {
            offset: 1,
            got: wire[1],
        })?;
        if wire[3] != RESERVED {
            return Err(WireError::SyncMismatch {
                offset: 3,
                got: wire[3],
            });
        }

        let declared = wire[2] as usize;
        if declared > MAX_PAYLOAD_LEN || HEADER_LEN + declared + CHECKSUM_LEN != wire.len() {
            return Err(WireError::LengthMismatch {
                declared,
                len: wire.len(),
            });
        }

        let body_len = wire.len() - CHECKSUM_LEN;
        let expected = stored_checksum(wire);
        let computed = checksum(wire, 0, body_len);
        if expected != computed {
            return Err(WireError::ChecksumMismatch { expected, computed });
        }

        Ok(Self {
            origin,
            msg_id: wire[4],
            payload: wire[HEADER_LEN..body_len].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(MIN_FRAME_LEN + self.payload.len());
        wire.push(SYNC);
        wire.push(self.origin.as_byte());
        wire.push(self.payload.len() as u8);
        wire.push(RESERVED);
        wire.push(self.msg_id);
        wire.extend_from_slice(&self.payload);

        let cs = checksum(&wire, 0, wire.len());
        wire.extend_from_slice(&cs.to_be_bytes());
        wire
    }
}

/// CRC-16/MODBUS over `bytes[start..start + length]`.
///
/// Panics if the range is out of bounds.
pub fn checksum(bytes: &[u8], start: usize, length: usize) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in &bytes[start..start + length] {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// True when the trailing checksum matches the body. Short frames are rejected
/// without computing anything.
pub fn verify(wire: &[u8]) -> bool {
    if wire.len() < MIN_FRAME_LEN {
        return false;
    }
    checksum(wire, 0, wire.len() - CHECKSUM_LEN) == stored_checksum(wire)
}

fn stored_checksum(wire: &[u8]) -> u16 {
    let n = wire.len();
    u16::from_be_bytes([wire[n - 2], wire[n - 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_REQUEST: [u8; 7] = [0xAA, 0x03, 0x00, 0x00, 0x0F, 0x58, 0x7C];
    const SETTINGS_REPORT: [u8; 13] = [
        0xAA, 0x04, 0x06, 0x00, 0x02, 0x01, 0x00, 0x02, 0x14, 0x02, 0x05, 0x85, 0xED,
    ];

    #[test]
    fn checksum_matches_modbus_check_value() {
        let data = b"123456789";
        assert_eq!(checksum(data, 0, data.len()), 0x4B37);
    }

    #[test]
    fn checksum_honours_range() {
        let data = b"xx123456789yy";
        assert_eq!(checksum(data, 2, 9), 0x4B37);
    }

    #[test]
    fn encode_status_request_fixture() {
        let frame = Frame::build(msg::STATUS, &[]).unwrap();
        assert_eq!(frame.encode(), STATUS_REQUEST.to_vec());
    }

    #[test]
    fn parse_settings_report_fixture() {
        let frame = Frame::parse(&SETTINGS_REPORT).unwrap();
        assert_eq!(frame.origin(), Origin::Heater);
        assert_eq!(frame.msg_id(), msg::SETTINGS);
        assert_eq!(frame.payload(), &[0x01, 0x00, 0x02, 0x14, 0x02, 0x05]);
    }

    #[test]
    fn verify_accepts_fixtures() {
        assert!(verify(&STATUS_REQUEST));
        assert!(verify(&SETTINGS_REPORT));
    }

    #[test]
    fn verify_rejects_any_single_byte_corruption() {
        for index in 0..SETTINGS_REPORT.len() - CHECKSUM_LEN {
            let mut wire = SETTINGS_REPORT;
            wire[index] ^= 0x01;
            assert!(!verify(&wire), "corruption at {index} went unnoticed");
        }
    }

    #[test]
    fn verify_rejects_short_frames() {
        assert!(!verify(&[0xAA, 0x03, 0x00, 0x00, 0x0F, 0x58]));
        assert!(!verify(&[]));
    }

    #[test]
    fn bad_checksum() {
        let mut wire = STATUS_REQUEST;
        wire[6] = 0x00;
        assert!(matches!(
            Frame::parse(&wire),
            Err(WireError::ChecksumMismatch {
                expected: 0x5800,
                computed: 0x587C
            })
        ));
    }

    #[test]
    fn unknown_origin_is_sync_mismatch() {
        let mut wire = STATUS_REQUEST;
        wire[1] = 0x07;
        assert!(matches!(
            Frame::parse(&wire),
            Err(WireError::SyncMismatch { offset: 1, got: 0x07 })
        ));
    }

    #[test]
    fn declared_length_must_match() {
        let mut wire = SETTINGS_REPORT.to_vec();
        wire.insert(6, 0x00);
        assert!(matches!(
            Frame::parse(&wire),
            Err(WireError::LengthMismatch { declared: 6, len: 14 })
        ));
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            Frame::parse(&[0xAA, 0x03]),
            Err(WireError::FrameTooShort { len: 2 })
        ));
    }

    #[test]
    fn build_rejects_oversized_payload() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            Frame::build(msg::SETTINGS, &payload),
            Err(WireError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1
            })
        );
        assert!(Frame::build(msg::SETTINGS, &payload[..MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn length_field_reflects_payload() {
        let wire = Frame::build(msg::FAN_ONLY, &[0xFF, 0xFF, 0x05, 0xFF])
            .unwrap()
            .encode();
        assert_eq!(wire[2], 4);
        assert_eq!(wire.len(), MIN_FRAME_LEN + 4);
        assert!(verify(&wire));
    }
}
