use std::{
    sync::{OnceLock, atomic::AtomicBool, mpsc},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use utilities::TransportError;

use crate::{
    channel::SharedChannel,
    config::{AxisConfig, PollPeriods},
    driver::{ControllerDriver, Frame},
    error::{EngineError, FormatError},
    primitive::MotionPrimitive,
    status::{AxisStatus, MotionRequest},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Wake,
    Shutdown,
}

pub(crate) struct AxisSlot {
    pub(crate) config: AxisConfig,
    /// Motion handed from a transaction to the poller.
    pub(crate) mailbox: Mutex<Option<MotionRequest>>,
    /// Publish the next sample unconditionally.
    pub(crate) refresh: AtomicBool,
    pub(crate) status: watch::Sender<AxisStatus>,
}

impl AxisSlot {
    fn new(config: AxisConfig, gain_support: bool) -> Self {
        let (status, _) = watch::channel(AxisStatus::new(config.encoder_present, gain_support));
        Self {
            config,
            mailbox: Mutex::new(None),
            refresh: AtomicBool::new(false),
            status,
        }
    }
}

/// State shared between a controller handle and its poller.
pub(crate) struct Card {
    pub(crate) name: String,
    pub(crate) driver: Box<dyn ControllerDriver>,
    pub(crate) channel: SharedChannel,
    pub(crate) axes: Vec<AxisSlot>,
    /// Set while a transaction is in build state.
    pub(crate) building: AtomicBool,
    pub(crate) ident: OnceLock<String>,
    pub(crate) periods: Mutex<PollPeriods>,
    pub(crate) timeout: Duration,
    pub(crate) update_delay: Duration,
    signals: mpsc::Sender<Signal>,
}

impl Card {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        driver: Box<dyn ControllerDriver>,
        channel: SharedChannel,
        axes: Vec<AxisConfig>,
        periods: PollPeriods,
        timeout: Duration,
        update_delay: Duration,
        signals: mpsc::Sender<Signal>,
    ) -> Self {
        let gain_support = driver.capabilities().gain_support;
        Self {
            name,
            axes: axes
                .into_iter()
                .map(|config| AxisSlot::new(config, gain_support))
                .collect(),
            driver,
            channel,
            building: AtomicBool::new(false),
            ident: OnceLock::new(),
            periods: Mutex::new(periods),
            timeout,
            update_delay,
            signals,
        }
    }

    pub(crate) fn axis(&self, axis: usize) -> Result<&AxisSlot, EngineError> {
        self.axes.get(axis).ok_or(EngineError::UnknownAxis(axis))
    }

    pub(crate) fn is_online(&self) -> bool {
        self.ident.get().is_some()
    }

    pub(crate) fn signal(&self, signal: Signal) {
        // the poller may already be gone during shutdown
        let _ = self.signals.send(signal);
    }

    pub(crate) fn format(
        &self,
        axis: usize,
        primitive: &MotionPrimitive,
    ) -> Result<Vec<Frame>, FormatError> {
        match primitive {
            MotionPrimitive::Raw(text) if text.is_empty() => Ok(Vec::new()),
            MotionPrimitive::Raw(text) => Ok(vec![self.driver.frame_raw(axis, text)?]),
            other => self.driver.format(axis, other),
        }
    }

    /// Writes frames in one channel turn and returns the byte count.
    pub(crate) fn write_frames(
        &self,
        axis: usize,
        frames: &[Frame],
        priority: bool,
    ) -> Result<usize, TransportError> {
        if frames.is_empty() {
            return Ok(0);
        }

        let mut channel = if priority {
            self.channel.lock_priority()
        } else {
            self.channel.lock()
        };

        let mut written = 0;
        for frame in frames {
            self.driver
                .dispatch(&mut **channel, axis, frame, self.timeout)?;
            written += frame.len();
        }
        Ok(written)
    }

    /// Formats and writes primitives outside of a transaction (recovery,
    /// timeout stop, post-move).
    pub(crate) fn send(
        &self,
        axis: usize,
        primitives: &[MotionPrimitive],
        priority: bool,
    ) -> Result<usize, EngineError> {
        let mut frames = Vec::new();
        for primitive in primitives {
            frames.extend(self.format(axis, primitive)?);
        }
        Ok(self.write_frames(axis, &frames, priority)?)
    }
}
