pub mod assembler;
pub mod autonomous;
pub mod bridge;
pub mod climate;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod ports;
pub mod runtime;
pub mod telemetry;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use assembler::FrameAssembler;
pub use bridge::{Bridge, TickReport};
pub use climate::{ClimateCall, ClimateCommand, ClimateTranslator};
pub use config::{BridgeConfig, BridgeTiming, ClimateDefaults, MqttConfig, SerialConfig};
pub use error::{BridgeError, Link, WireError};
pub use frame::{checksum, verify, Frame, Origin};
pub use message::{decode_settings, decode_status, Message, Settings, Status};
pub use ports::{BytePort, CommandIntentSource, CounterStore, Intent, TelemetrySink};
pub use thermostat::{ThermostatAction, ThermostatController, ThermostatState};
pub use topics::*;
pub use types::{BridgeSnapshot, ClimateAction, ClimateMode, ClimatePreset, TemperatureSource};
