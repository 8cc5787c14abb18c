use std::io;

use thiserror::Error;

use crate::frame::MAX_PAYLOAD_LEN;

/// Errors arising from frame validation, payload decoding and frame encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame too short ({len} bytes, minimum 7)")]
    FrameTooShort { len: usize },

    #[error("sync mismatch at offset {offset} (got 0x{got:02X})")]
    SyncMismatch { offset: usize, got: u8 },

    #[error("declared payload length {declared} does not match frame size {len}")]
    LengthMismatch { declared: usize, len: usize },

    #[error("checksum mismatch (expected 0x{expected:04X}, computed 0x{computed:04X})")]
    ChecksumMismatch { expected: u16, computed: u16 },

    #[error("unexpected payload length for {msg_type}: expected {expected}, got {got}")]
    MalformedPayload {
        msg_type: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("payload of {len} bytes exceeds the {} byte maximum", MAX_PAYLOAD_LEN)]
    PayloadTooLarge { len: usize },
}

impl WireError {
    pub(crate) fn malformed(msg_type: &'static str, expected: usize, got: usize) -> Self {
        Self::MalformedPayload {
            msg_type,
            expected,
            got,
        }
    }
}

/// Which serial link an I/O error happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Display,
    Heater,
}

impl Link {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Heater => "heater",
        }
    }
}

/// Errors reported by the bridge. None of them stop the relay path.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("write to {} port failed: {source}", link.as_str())]
    Write {
        link: Link,
        #[source]
        source: io::Error,
    },

    #[error("read from {} port failed: {source}", link.as_str())]
    Read {
        link: Link,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] WireError),

    #[error("counter storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type Result<T> = std::result::Result<T, WireError>;
