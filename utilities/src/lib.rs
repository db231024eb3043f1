pub mod lazy_tcp;
pub mod line;
pub mod modbus;
pub mod serial;
pub mod transport;

pub use transport::{ChannelIo, TransportChannel, TransportError};
