use std::io::{self, Read, Write};

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("CRC error: expected 0x{expected:04X}, received 0x{received:04X}")]
    InvalidCrc { expected: u16, received: u16 },

    #[error("Invalid response length: expected {expected}, received {received}")]
    InvalidResponseLength { expected: usize, received: usize },

    #[error("Invalid slave ID: expected {expected}, received {received}")]
    InvalidSlaveId { expected: u8, received: u8 },

    #[error("Invalid function code: expected 0x{expected:02X}, received 0x{received:02X}")]
    InvalidFunctionCode { expected: u8, received: u8 },

    #[error("Modbus exception (function 0x{function_code:02X}): {} (0x{exception_code:02X})", exception_name(.exception_code))]
    ExceptionResponse { function_code: u8, exception_code: u8 },

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

fn exception_name(code: &u8) -> &'static str {
    match *code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed To Respond",
        _ => "Unknown Exception",
    }
}

impl From<ModbusError> for TransportError {
    fn from(error: ModbusError) -> Self {
        match error {
            ModbusError::IoError(e) if e.kind() == io::ErrorKind::TimedOut => {
                TransportError::Timeout(std::time::Duration::ZERO)
            }
            ModbusError::IoError(e) => TransportError::Io(e),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

pub fn calculate_crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

fn push_crc(frame: &mut Vec<u8>) {
    let crc = calculate_crc16(frame);
    frame.push((crc & 0xFF) as u8);
    frame.push((crc >> 8) as u8);
}

/// Modbus RTU client for one slave id. Owns no connection; every call takes
/// the link it should talk over.
#[derive(Debug, Clone)]
pub struct Modbus {
    id: u8,
}

impl Modbus {
    pub fn new(id: u8) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn read_holding_registers_request(&self, address: u16, count: u16) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8);
        frame.push(self.id);
        frame.push(FunctionCode::ReadHoldingRegisters as u8);
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&count.to_be_bytes());
        push_crc(&mut frame);
        frame
    }

    pub fn write_single_register_request(&self, address: u16, value: u16) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8);
        frame.push(self.id);
        frame.push(FunctionCode::WriteSingleRegister as u8);
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&value.to_be_bytes());
        push_crc(&mut frame);
        frame
    }

    pub fn write_multiple_registers_request(
        &self,
        address: u16,
        values: &[u16],
    ) -> Result<Vec<u8>, ModbusError> {
        if values.is_empty() || values.len() > 123 {
            return Err(ModbusError::ProtocolError(
                "Invalid register count. Must be between 1 and 123".to_string(),
            ));
        }

        let mut frame = Vec::with_capacity(9 + values.len() * 2);
        frame.push(self.id);
        frame.push(FunctionCode::WriteMultipleRegisters as u8);
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
        frame.push((values.len() * 2) as u8);
        for value in values {
            frame.extend_from_slice(&value.to_be_bytes());
        }
        push_crc(&mut frame);
        Ok(frame)
    }

    /// Sends a prebuilt request frame and returns the validated response
    /// (slave id through payload, CRC stripped).
    pub fn transact<T: Read + Write>(
        &self,
        client: &mut T,
        request: &[u8],
    ) -> Result<Vec<u8>, ModbusError> {
        if request.len() < 4 || request[0] != self.id {
            return Err(ModbusError::ProtocolError(
                "Request frame does not belong to this slave".to_string(),
            ));
        }
        let function = request[1];

        client.write_all(request)?;

        let mut header = [0u8; 2];
        client.read_exact(&mut header)?;

        if header[0] != self.id {
            return Err(ModbusError::InvalidSlaveId {
                expected: self.id,
                received: header[0],
            });
        }

        if header[1] & 0x80 == 0x80 {
            let mut rest = [0u8; 3];
            client.read_exact(&mut rest)?;
            let mut frame = header.to_vec();
            frame.push(rest[0]);
            check_crc(&frame, u16::from_le_bytes([rest[1], rest[2]]))?;
            return Err(ModbusError::ExceptionResponse {
                function_code: header[1] & 0x7F,
                exception_code: rest[0],
            });
        }

        if header[1] != function {
            return Err(ModbusError::InvalidFunctionCode {
                expected: function,
                received: header[1],
            });
        }

        let mut frame = header.to_vec();
        let payload_len = if function == FunctionCode::ReadHoldingRegisters as u8 {
            let mut count = [0u8; 1];
            client.read_exact(&mut count)?;
            frame.push(count[0]);
            count[0] as usize
        } else {
            // write responses echo address and value/count
            4
        };

        let mut rest = vec![0u8; payload_len + 2];
        client.read_exact(&mut rest)?;
        frame.extend_from_slice(&rest[..payload_len]);
        check_crc(&frame, u16::from_le_bytes([rest[payload_len], rest[payload_len + 1]]))?;

        if function != FunctionCode::ReadHoldingRegisters as u8 && frame[2..6] != request[2..6] {
            return Err(ModbusError::ProtocolError(format!(
                "Write echo mismatch: sent {:02X?}, received {:02X?}",
                &request[2..6],
                &frame[2..6]
            )));
        }

        Ok(frame)
    }

    pub fn read_holding_registers<T: Read + Write>(
        &self,
        client: &mut T,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let request = self.read_holding_registers_request(address, count);
        let response = self.transact(client, &request)?;

        let data = &response[3..];
        if data.len() != count as usize * 2 {
            return Err(ModbusError::InvalidResponseLength {
                expected: count as usize * 2,
                received: data.len(),
            });
        }

        Ok(data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn read_holding_register<T: Read + Write>(
        &self,
        client: &mut T,
        address: u16,
    ) -> Result<u16, ModbusError> {
        Ok(self.read_holding_registers(client, address, 1)?[0])
    }

    pub fn write_single_register<T: Read + Write>(
        &self,
        client: &mut T,
        address: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        let request = self.write_single_register_request(address, value);
        self.transact(client, &request).map(|_| ())
    }
}

fn check_crc(frame: &[u8], received: u16) -> Result<(), ModbusError> {
    let expected = calculate_crc16(frame);
    if expected != received {
        return Err(ModbusError::InvalidCrc { expected, received });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Plays back a canned response and records the request.
    struct Canned {
        request: Vec<u8>,
        response: Cursor<Vec<u8>>,
    }

    impl Canned {
        fn new(response: Vec<u8>) -> Self {
            Self {
                request: Vec::new(),
                response: Cursor::new(response),
            }
        }
    }

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.response.read(buf)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.request.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
        push_crc(&mut frame);
        frame
    }

    #[test]
    fn crc_matches_reference_vector() {
        // 01 03 00 00 00 0A -> C5 CD
        let frame = Modbus::new(1).read_holding_registers_request(0x0000, 10);
        assert_eq!(&frame[6..], &[0xC5, 0xCD]);
    }

    #[test]
    fn reads_holding_registers() {
        let mut link = Canned::new(with_crc(vec![0x01, 0x03, 0x04, 0x00, 0x08, 0x12, 0x34]));
        let values = Modbus::new(1)
            .read_holding_registers(&mut link, 0x1003, 2)
            .unwrap();

        assert_eq!(values, vec![0x0008, 0x1234]);
        assert_eq!(link.request, Modbus::new(1).read_holding_registers_request(0x1003, 2));
    }

    #[test]
    fn write_single_register_checks_echo() {
        let modbus = Modbus::new(2);
        let request = modbus.write_single_register_request(0x6002, 0x0010);

        let mut link = Canned::new(request.clone());
        modbus.write_single_register(&mut link, 0x6002, 0x0010).unwrap();

        let mut wrong = request.clone();
        wrong[5] = 0x40;
        let mut link = Canned::new(with_crc(wrong[..6].to_vec()));
        assert!(matches!(
            modbus.write_single_register(&mut link, 0x6002, 0x0010),
            Err(ModbusError::ProtocolError(_))
        ));
    }

    #[test]
    fn exception_response_is_decoded() {
        let mut link = Canned::new(with_crc(vec![0x01, 0x83, 0x02]));
        let err = Modbus::new(1)
            .read_holding_register(&mut link, 0x9999)
            .unwrap_err();

        assert!(matches!(
            err,
            ModbusError::ExceptionResponse {
                function_code: 0x03,
                exception_code: 0x02
            }
        ));
        assert!(err.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut response = with_crc(vec![0x01, 0x03, 0x02, 0x00, 0x01]);
        let last = response.len() - 1;
        response[last] ^= 0xFF;

        let mut link = Canned::new(response);
        assert!(matches!(
            Modbus::new(1).read_holding_register(&mut link, 0),
            Err(ModbusError::InvalidCrc { .. })
        ));
    }

    #[test]
    fn multiple_register_request_layout() {
        let frame = Modbus::new(1)
            .write_multiple_registers_request(0x6200, &[0x0041, 0x0000, 0x0064])
            .unwrap();
        assert_eq!(&frame[..7], &[0x01, 0x10, 0x62, 0x00, 0x00, 0x03, 0x06]);
        assert_eq!(frame.len(), 9 + 6);
        assert!(Modbus::new(1).write_multiple_registers_request(0, &[]).is_err());
    }
}
