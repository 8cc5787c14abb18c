use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::Context;
use autoterm_common::BytePort;
use serialport::SerialPort;

const PORT_TIMEOUT: Duration = Duration::from_millis(50);

/// One serial link, polled without blocking.
pub struct SerialLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(name: &str, baud_rate: u32) -> anyhow::Result<Self> {
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(PORT_TIMEOUT)
            .open()
            .with_context(|| format!("failed to open serial port {name}"))?;
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl BytePort for SerialLink {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // bytes_to_read() keeps read() from waiting out the port timeout.
        let available = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if available == 0 {
            return Ok(0);
        }
        let len = available.min(buf.len());
        self.port.read(&mut buf[..len])
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }
}
