//! Capability traits for everything the bridge talks to.

use std::collections::VecDeque;
use std::io;

use crate::climate::ClimateCall;
use crate::error::BridgeError;
use crate::types::TemperatureSource;

/// One side of the serial link.
pub trait BytePort {
    /// Read whatever is available without blocking. `Ok(0)` means nothing is
    /// pending right now.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Receives decoded values. Only called when a value actually changed.
pub trait TelemetrySink {
    fn publish(&mut self, name: &str, value: f32);

    fn publish_text(&mut self, name: &str, value: &str);
}

/// Persistent storage for the cumulative operating hours.
pub trait CounterStore {
    fn load(&mut self) -> Result<Option<f32>, BridgeError>;

    fn save(&mut self, hours: f32) -> Result<(), BridgeError>;
}

/// A request arriving from the user-facing side.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Climate(ClimateCall),
    /// Run the fan only, at this level.
    FanLevel(i32),
    /// `None` hands source selection back to the heater settings.
    TemperatureSource(Option<TemperatureSource>),
    /// Latest value of the panel temperature override feed.
    PanelOverride(Option<f32>),
    /// Thermostat band below/above the target; `None` keeps that side.
    Hysteresis { on_c: Option<f32>, off_c: Option<f32> },
}

pub trait CommandIntentSource {
    fn next_intent(&mut self) -> Option<Intent>;
}

impl CommandIntentSource for VecDeque<Intent> {
    fn next_intent(&mut self) -> Option<Intent> {
        self.pop_front()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    use super::{BytePort, CounterStore, TelemetrySink};
    use crate::error::BridgeError;

    #[derive(Debug, Default)]
    pub struct PortState {
        pub rx: VecDeque<u8>,
        pub tx: Vec<u8>,
        pub fail_writes: bool,
    }

    /// In-memory port; clones share the same buffers.
    #[derive(Debug, Clone, Default)]
    pub struct FakePort(pub Rc<RefCell<PortState>>);

    impl FakePort {
        pub fn push_rx(&self, data: &[u8]) {
            self.0.borrow_mut().rx.extend(data.iter().copied());
        }

        pub fn take_tx(&self) -> Vec<u8> {
            std::mem::take(&mut self.0.borrow_mut().tx)
        }

        pub fn fail_writes(&self, fail: bool) {
            self.0.borrow_mut().fail_writes = fail;
        }
    }

    impl BytePort for FakePort {
        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.0.borrow_mut();
            let n = buf.len().min(state.rx.len());
            for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
            let mut state = self.0.borrow_mut();
            if state.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            state.tx.extend_from_slice(data);
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct RecordingSink(pub Rc<RefCell<Vec<(String, String)>>>);

    impl RecordingSink {
        pub fn values(&self, name: &str) -> Vec<String> {
            self.0
                .borrow()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .collect()
        }
    }

    impl TelemetrySink for RecordingSink {
        fn publish(&mut self, name: &str, value: f32) {
            self.0.borrow_mut().push((name.to_string(), format!("{value}")));
        }

        fn publish_text(&mut self, name: &str, value: &str) {
            self.0.borrow_mut().push((name.to_string(), value.to_string()));
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct SharedStore {
        pub hours: Rc<RefCell<Option<f32>>>,
        pub saves: Rc<RefCell<usize>>,
        pub unavailable: bool,
    }

    impl CounterStore for SharedStore {
        fn load(&mut self) -> Result<Option<f32>, BridgeError> {
            if self.unavailable {
                return Err(BridgeError::StorageUnavailable("no flash".to_string()));
            }
            Ok(*self.hours.borrow())
        }

        fn save(&mut self, hours: f32) -> Result<(), BridgeError> {
            if self.unavailable {
                return Err(BridgeError::StorageUnavailable("no flash".to_string()));
            }
            *self.hours.borrow_mut() = Some(hours);
            *self.saves.borrow_mut() += 1;
            Ok(())
        }
    }
}
