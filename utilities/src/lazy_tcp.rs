use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::transport::{TransportChannel, TransportError};

/// TCP channel that connects on first use and reconnects after the peer
/// drops the link (terminal servers and Modbus gateways do this routinely).
pub struct LazyTcpStream {
    addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    max_retries: u32,
    connect_timeout: Duration,
}

impl LazyTcpStream {
    pub fn new<A: ToSocketAddrs>(addr: A, max_retries: u32, connect_timeout: Duration) -> Self {
        LazyTcpStream {
            addr: addr.to_socket_addrs().ok().and_then(|mut addrs| addrs.next()),
            stream: None,
            max_retries,
            connect_timeout,
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn connect(&mut self) -> io::Result<()> {
        let addr = self.addr.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Unresolvable controller address")
        })?;

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to {} (attempt {})", addr, attempt + 1);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connect to {} failed (attempt {}): {}", addr, attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "Max connection retries reached")
        }))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            self.connect()?;
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        self.drop_stream();
        self.connect()
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_link_loss(error: &io::Error) -> bool {
        matches!(
            error.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::NotConnected
        )
    }

    fn with_stream<T>(
        &mut self,
        timeout: Duration,
        mut op: impl FnMut(&mut TcpStream) -> io::Result<T>,
    ) -> Result<T, TransportError> {
        let first = {
            let stream = self
                .stream()
                .map_err(|e| TransportError::from_io(e, timeout))?;
            stream
                .set_read_timeout(Some(timeout))
                .and_then(|_| stream.set_write_timeout(Some(timeout)))
                .and_then(|_| op(stream))
        };

        match first {
            Ok(value) => Ok(value),
            Err(e) if Self::is_link_loss(&e) => {
                warn!("Link to {:?} lost ({}), reconnecting", self.addr, e);
                self.reconnect()
                    .map_err(|e| TransportError::from_io(e, timeout))?;
                let stream = self
                    .stream()
                    .map_err(|e| TransportError::from_io(e, timeout))?;
                stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|_| stream.set_write_timeout(Some(timeout)))
                    .and_then(|_| op(stream))
                    .map_err(|e| TransportError::from_io(e, timeout))
            }
            Err(e) => Err(TransportError::from_io(e, timeout)),
        }
    }
}

impl TransportChannel for LazyTcpStream {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        self.with_stream(timeout, |stream| stream.write(bytes))
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let read = self.with_stream(timeout, |stream| stream.read(buffer))?;
        if read == 0 && !buffer.is_empty() {
            // orderly shutdown from the peer; next call reconnects
            self.drop_stream();
            return Err(TransportError::Closed);
        }
        Ok(read)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        // discard whatever the controller left in the socket buffer
        stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let drained = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break Err(TransportError::Closed),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(TransportError::Io(e)),
            }
        };
        stream.set_nonblocking(false)?;
        stream.flush()?;

        if drained.is_err() {
            self.drop_stream();
        }
        drained
    }
}
