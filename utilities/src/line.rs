//! ASCII request/reply framing for line-oriented controllers.

use std::time::Duration;

use tracing::debug;

use crate::transport::{TransportChannel, TransportError};

const MAX_REPLY_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct LineCodec {
    output_eos: Vec<u8>,
    input_eos: Vec<u8>,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(b"\r", b"\r\n")
    }
}

impl LineCodec {
    pub fn new(output_eos: &[u8], input_eos: &[u8]) -> Self {
        Self {
            output_eos: output_eos.to_vec(),
            input_eos: input_eos.to_vec(),
        }
    }

    /// Appends the output terminator.
    pub fn frame(&self, command: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(command.len() + self.output_eos.len());
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(&self.output_eos);
        bytes
    }

    pub fn send(
        &self,
        channel: &mut dyn TransportChannel,
        command: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        debug!("-> {:?}", command);
        channel.write_all(&self.frame(command), timeout)
    }

    /// Reads up to and excluding the input terminator.
    pub fn read_line(
        &self,
        channel: &mut dyn TransportChannel,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];

        loop {
            channel.read_exact(&mut byte, timeout)?;
            line.push(byte[0]);

            if line.ends_with(&self.input_eos) {
                line.truncate(line.len() - self.input_eos.len());
                break;
            }
            if line.len() > MAX_REPLY_LEN {
                return Err(TransportError::Protocol(format!(
                    "Reply exceeds {MAX_REPLY_LEN} bytes without terminator"
                )));
            }
        }

        let reply = String::from_utf8_lossy(&line).trim().to_string();
        debug!("<- {:?}", reply);
        Ok(reply)
    }

    /// Write-then-read round trip. An empty reply counts as a failed query.
    pub fn query(
        &self,
        channel: &mut dyn TransportChannel,
        command: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        self.send(channel, command, timeout)?;
        let reply = self.read_line(channel, timeout)?;
        if reply.is_empty() {
            return Err(TransportError::Protocol(format!("Empty reply to {command:?}")));
        }
        Ok(reply)
    }
}
