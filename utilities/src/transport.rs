use std::{
    io::{self, Read, Write},
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport closed by peer")]
    Closed,

    #[error("Transport IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed reply: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// Maps an IO error raised under a deadline onto the transport taxonomy.
    pub fn from_io(error: io::Error, timeout: Duration) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout(timeout),
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(error),
        }
    }
}

impl From<TransportError> for io::Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Io(error) => error,
            TransportError::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, error.to_string()),
            TransportError::Closed => io::Error::new(io::ErrorKind::UnexpectedEof, error.to_string()),
            TransportError::Protocol(_) => io::Error::new(io::ErrorKind::InvalidData, error.to_string()),
        }
    }
}

/// Byte-stream link to one controller.
///
/// Every call carries its own deadline; a read that sees no bytes before the
/// deadline returns [`TransportError::Timeout`] instead of blocking.
pub trait TransportChannel: Send {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    fn write_all(&mut self, mut bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        while !bytes.is_empty() {
            let written = self.write(bytes, timeout)?;
            if written == 0 {
                return Err(TransportError::Closed);
            }
            bytes = &bytes[written..];
        }
        Ok(())
    }

    fn read_exact(&mut self, mut buffer: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        while !buffer.is_empty() {
            let read = self.read(buffer, timeout)?;
            if read == 0 {
                return Err(TransportError::Closed);
            }
            buffer = &mut buffer[read..];
        }
        Ok(())
    }
}

impl<T: TransportChannel + ?Sized> TransportChannel for Box<T> {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).write(bytes, timeout)
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read(buffer, timeout)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush()
    }
}

/// `Read + Write` view of a channel with a fixed deadline, for codecs written
/// against `std::io` such as [`crate::modbus::Modbus`].
pub struct ChannelIo<'a> {
    channel: &'a mut dyn TransportChannel,
    timeout: Duration,
}

impl<'a> ChannelIo<'a> {
    pub fn new(channel: &'a mut dyn TransportChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }
}

impl Read for ChannelIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf, self.timeout).map_err(io::Error::from)
    }
}

impl Write for ChannelIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf, self.timeout).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush().map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Trickle {
        incoming: VecDeque<u8>,
        outgoing: Vec<u8>,
    }

    impl TransportChannel for Trickle {
        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
            // one byte at a time to exercise the write_all loop
            self.outgoing.push(bytes[0]);
            Ok(1)
        }

        fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
            match self.incoming.pop_front() {
                Some(byte) => {
                    buffer[0] = byte;
                    Ok(1)
                }
                None => Err(TransportError::Timeout(timeout)),
            }
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn write_all_and_read_exact_loop_over_partial_transfers() {
        let mut channel = Trickle {
            incoming: VecDeque::from(vec![1, 2, 3]),
            outgoing: Vec::new(),
        };

        channel.write_all(b"abc", Duration::from_secs(1)).unwrap();
        assert_eq!(channel.outgoing, b"abc");

        let mut buffer = [0u8; 3];
        channel.read_exact(&mut buffer, Duration::from_secs(1)).unwrap();
        assert_eq!(buffer, [1, 2, 3]);

        let err = channel.read_exact(&mut buffer, Duration::from_millis(5)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn io_errors_map_onto_timeouts() {
        let timeout = Duration::from_millis(10);
        let err = TransportError::from_io(io::Error::from(io::ErrorKind::WouldBlock), timeout);
        assert!(err.is_timeout());

        let err = TransportError::from_io(io::Error::from(io::ErrorKind::UnexpectedEof), timeout);
        assert!(matches!(err, TransportError::Closed));

        let back: io::Error = TransportError::Timeout(timeout).into();
        assert_eq!(back.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn channel_io_forwards_to_the_channel() {
        let mut channel = Trickle {
            incoming: VecDeque::from(vec![7]),
            outgoing: Vec::new(),
        };
        let mut io = ChannelIo::new(&mut channel, Duration::from_secs(1));

        io.write_all(b"xy").unwrap();
        let mut byte = [0u8; 1];
        io.read_exact(&mut byte).unwrap();

        assert_eq!(byte, [7]);
        assert_eq!(channel.outgoing, b"xy");
    }
}
