use std::time::Duration;

use utilities::{TransportChannel, TransportError};

use crate::{
    error::FormatError,
    primitive::MotionPrimitive,
    status::AxisSample,
};

/// One write on the wire. Register protocols cannot concatenate requests,
/// so a primitive may expand to several frames.
pub type Frame = Vec<u8>;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 300;

/// Translates primitives into a controller's wire format.
pub trait CommandFormatter: Send + Sync {
    /// An empty vector is a legal result for primitives with no wire effect.
    fn format(&self, axis: usize, primitive: &MotionPrimitive) -> Result<Vec<Frame>, FormatError>;

    /// Frames configured pre/post-motion command text for the axis.
    fn frame_raw(&self, axis: usize, command: &str) -> Result<Frame, FormatError>;

    fn max_message_size(&self) -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }

    /// Writes one frame. Controllers that acknowledge every command read the
    /// acknowledgement here.
    fn dispatch(
        &self,
        channel: &mut dyn TransportChannel,
        _axis: usize,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        channel.write_all(frame, timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Done is derived from a zero velocity readback.
    pub velocity_done: bool,
    pub gain_support: bool,
}

/// Status side of a controller driver. Each query is one round trip and is
/// called with the channel lock held.
pub trait StatusQuery: Send + Sync {
    /// Returns the controller identification string.
    fn identify(
        &self,
        channel: &mut dyn TransportChannel,
        timeout: Duration,
    ) -> Result<String, TransportError>;

    fn query_status(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    fn query_position(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Extra reads (limits, velocity) for controllers that split them out.
    fn query_auxiliary(
        &self,
        _channel: &mut dyn TransportChannel,
        _axis: usize,
        _sample: &mut AxisSample,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// Commands issued once when a limit strike is detected, given the last
    /// known position.
    fn recovery_sequence(&self, _axis: usize, _position: i32) -> Vec<MotionPrimitive> {
        Vec::new()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

pub trait ControllerDriver: CommandFormatter + StatusQuery {}

impl<T: CommandFormatter + StatusQuery> ControllerDriver for T {}
