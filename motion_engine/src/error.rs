use std::io;

use thiserror::Error;
use utilities::TransportError;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{0} is not supported by this controller")]
    Unsupported(&'static str),

    #[error("Parameter out of range: {0}")]
    OutOfRange(String),

    #[error("Axis {0} is not configured on this controller")]
    UnknownAxis(usize),

    #[error("Malformed command {0:?}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transaction sequence error: {0}")]
    Sequence(&'static str),

    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    BufferOverflow { size: usize, max: usize },

    #[error("Unknown axis {0}")]
    UnknownAxis(usize),

    #[error("Unknown card {0}")]
    UnknownCard(usize),

    #[error("Card {0} is offline")]
    CardOffline(String),

    #[error("Failed to spawn poller thread: {0}")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Format(#[from] FormatError),
}
