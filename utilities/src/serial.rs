use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::transport::{TransportChannel, TransportError};

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl SerialSettings {
    /// 8N1, no flow control: what every controller in this family ships with.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialChannel {
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(1);
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(settings.flow_control)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Io(io::Error::other(e)))?;

        debug!("Opened {} at {} baud", settings.path, settings.baud_rate);
        Ok(Self { port, timeout })
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if self.timeout != timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| TransportError::Io(io::Error::other(e)))?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

impl TransportChannel for SerialChannel {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        self.set_timeout(timeout)?;
        self.port
            .write(bytes)
            .map_err(|e| TransportError::from_io(e, timeout))
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.set_timeout(timeout)?;
        self.port
            .read(buffer)
            .map_err(|e| TransportError::from_io(e, timeout))
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Io(io::Error::other(e)))?;
        self.port.flush().map_err(TransportError::Io)
    }
}
