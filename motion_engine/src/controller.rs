use std::{
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
    time::Duration,
};

use tokio::sync::watch;
use tracing::info;
use utilities::TransportChannel;

use crate::{
    card::{Card, Signal},
    channel::SharedChannel,
    config::{CardConfig, PollPeriods},
    driver::ControllerDriver,
    error::EngineError,
    poller::Poller,
    primitive::MotionPrimitive,
    status::AxisStatus,
    transaction::{Accepted, Transaction},
};

/// Handle to one card: its driver, channel, axes and poller.
pub struct Controller {
    card: Arc<Card>,
    poller: Option<JoinHandle<()>>,
}

impl Controller {
    /// Builds the card and identifies the controller, but leaves the poller
    /// for the caller to drive.
    pub fn new(
        config: CardConfig,
        driver: Box<dyn ControllerDriver>,
        channel: Box<dyn TransportChannel>,
    ) -> (Self, Poller) {
        let (signals, receiver) = mpsc::channel();
        let card = Arc::new(Card::new(
            config.name,
            driver,
            SharedChannel::new(channel),
            config.axes,
            config.poller.periods(),
            config.poller.timeout(),
            config.poller.update_delay(),
            signals,
        ));

        let mut poller = Poller::new(card.clone(), receiver);
        poller.init();

        (Self { card, poller: None }, poller)
    }

    /// Builds the card and runs its poller on a dedicated thread.
    pub fn start(
        config: CardConfig,
        driver: Box<dyn ControllerDriver>,
        channel: Box<dyn TransportChannel>,
    ) -> Result<Self, EngineError> {
        let (mut controller, poller) = Self::new(config, driver, channel);

        let handle = thread::Builder::new()
            .name(format!("poller-{}", controller.card.name))
            .spawn(move || poller.run())
            .map_err(EngineError::Spawn)?;
        controller.poller = Some(handle);

        Ok(controller)
    }

    pub fn name(&self) -> &str {
        &self.card.name
    }

    /// Identification string reported by the controller, if it answered.
    pub fn ident(&self) -> Option<&str> {
        self.card.ident.get().map(String::as_str)
    }

    pub fn is_online(&self) -> bool {
        self.card.is_online()
    }

    pub fn axis_count(&self) -> usize {
        self.card.axes.len()
    }

    pub fn start_transaction(&self, axis: usize) -> Result<Transaction<'_>, EngineError> {
        Transaction::start(&self.card, axis)
    }

    /// Single-primitive transaction.
    pub fn request_motion(
        &self,
        axis: usize,
        primitive: MotionPrimitive,
    ) -> Result<Accepted, EngineError> {
        let mut transaction = self.start_transaction(axis)?;
        transaction.append(primitive)?;
        transaction.end()
    }

    pub fn read_status(&self, axis: usize) -> Result<AxisStatus, EngineError> {
        Ok(self.card.axis(axis)?.status.borrow().clone())
    }

    /// Receiver woken whenever the poller publishes a noteworthy update.
    pub fn subscribe(&self, axis: usize) -> Result<watch::Receiver<AxisStatus>, EngineError> {
        Ok(self.card.axis(axis)?.status.subscribe())
    }

    /// Takes effect on the next poll iteration.
    pub fn set_poll_period(&self, moving: Duration, idle: Duration) {
        *self.card.periods.lock() = PollPeriods { moving, idle };
        info!(
            "{}: poll period set to {:?} moving, {:?} idle",
            self.card.name, moving, idle
        );
        self.card.signal(Signal::Wake);
    }

    pub fn poll_periods(&self) -> PollPeriods {
        *self.card.periods.lock()
    }

    /// Stops the poller thread and waits for it.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.poller.take() {
            self.card.signal(Signal::Shutdown);
            if handle.join().is_err() {
                tracing::error!("{}: poller thread panicked", self.card.name);
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.card.name)
            .field("ident", &self.ident())
            .field("axes", &self.card.axes.len())
            .finish()
    }
}
