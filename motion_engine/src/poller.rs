use std::{
    sync::{
        Arc,
        atomic::Ordering,
        mpsc::{Receiver, RecvTimeoutError},
    },
};

use tracing::{debug, error, info, warn};
use utilities::{TransportChannel, TransportError};

use crate::{
    card::{AxisSlot, Card, Signal},
    health::{CommHealth, Outcome},
    inference::{self, Tuning},
    limits::LimitLatch,
    primitive::MotionPrimitive,
    status::{AxisSample, AxisStatus},
};

struct AxisRecord {
    status: AxisStatus,
    latch: LimitLatch,
    tuning: Tuning,
    seeded: bool,
}

/// What happened to one axis during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisPoll {
    /// Sampled and folded into the axis status.
    Updated,
    /// Motion was just issued; waiting for the controller to settle.
    Deferred,
    /// Query failed once; update skipped.
    Skipped,
    /// Query failed repeatedly; comm fault published.
    Faulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub axes: Vec<AxisPoll>,
    /// Some axis is moving or has a motion pending.
    pub active: bool,
}

/// Background status loop of one card.
///
/// [`Poller::run`] owns the thread; [`Poller::cycle`] runs a single pass and
/// is what the loop calls on every period.
pub struct Poller {
    card: Arc<Card>,
    records: Vec<AxisRecord>,
    health: CommHealth,
    signals: Receiver<Signal>,
    active: bool,
}

impl Poller {
    pub(crate) fn new(card: Arc<Card>, signals: Receiver<Signal>) -> Self {
        let capabilities = card.driver.capabilities();
        let records = card
            .axes
            .iter()
            .map(|slot| AxisRecord {
                status: slot.status.borrow().clone(),
                latch: LimitLatch::default(),
                tuning: Tuning::new(&slot.config, capabilities.velocity_done),
                seeded: false,
            })
            .collect();

        Self {
            card,
            records,
            health: CommHealth::default(),
            signals,
            active: false,
        }
    }

    /// Identifies the controller. A card that fails here stays offline.
    pub(crate) fn init(&mut self) -> bool {
        if self.card.axes.is_empty() {
            warn!("{}: no axes configured, card disabled", self.card.name);
            return false;
        }

        let card = &self.card;
        match round_trip(card, |channel| card.driver.identify(channel, card.timeout)) {
            Ok(ident) => {
                info!("{}: found {} ({} axes)", card.name, ident, card.axes.len());
                let _ = card.ident.set(ident);
                true
            }
            Err(e) => {
                error!("{}: identification failed: {}", card.name, e);
                false
            }
        }
    }

    pub fn health(&self) -> CommHealth {
        self.health
    }

    pub fn cycle(&mut self) -> CycleReport {
        let card = self.card.clone();
        if !card.is_online() {
            return CycleReport::default();
        }

        let axes = (0..self.records.len())
            .map(|axis| self.poll_axis(&card, axis))
            .collect();

        self.active = self.records.iter().zip(&card.axes).any(|(record, slot)| {
            record.status.pending_motion.is_some()
                || !record.status.flags.done
                || slot.mailbox.lock().is_some()
        });

        CycleReport {
            axes,
            active: self.active,
        }
    }

    pub fn run(mut self) {
        info!("{}: poller started", self.card.name);

        loop {
            self.cycle();

            let period = self.card.periods.lock().select(self.active);
            match self.signals.recv_timeout(period) {
                Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => {}
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("{}: poller stopped", self.card.name);
    }

    fn poll_axis(&mut self, card: &Card, axis: usize) -> AxisPoll {
        let slot = &card.axes[axis];
        let record = &mut self.records[axis];

        let mut attached = false;
        {
            let mut mailbox = slot.mailbox.lock();
            if let Some(request) = mailbox.as_ref() {
                if request.issued_at.elapsed() < card.update_delay {
                    return AxisPoll::Deferred;
                }
            }
            if let Some(request) = mailbox.take() {
                debug!("{}: axis {} motion attached: {:?}", card.name, axis, request.target);
                record.status.pending_motion = Some(request);
                record.status.no_motion_count = 0;
                record.status.flags.done = false;
                attached = true;
            }
        }

        let sample = sample_axis(card, axis);
        let outcome = self.health.record(sample.is_ok());
        CommHealth::apply(outcome, &mut record.status.flags);

        let sample = match (outcome, sample) {
            (Outcome::Update, Ok(sample)) => sample,
            (Outcome::Soft, Err(e)) => {
                warn!("{}: axis {} query failed, retrying: {}", card.name, axis, e);
                return AxisPoll::Skipped;
            }
            (_, result) => {
                if let Err(e) = result {
                    error!("{}: axis {} communication error: {}", card.name, axis, e);
                }
                let finished = record.status.pending_motion.take().is_some();
                publish(slot, &record.status, finished, true);
                return AxisPoll::Faulted;
            }
        };

        if !record.seeded {
            record.status.position = sample.position;
            record.seeded = true;
        }

        let verdict = inference::update(&mut record.status, &sample, attached, &record.tuning);

        if verdict.timed_out {
            warn!(
                "{}: axis {} motion timed out at {}, stopping",
                card.name, axis, record.status.position
            );
            if let Err(e) = card.send(axis, &[MotionPrimitive::Stop], true) {
                error!("{}: axis {} stop failed: {}", card.name, axis, e);
            }
        }

        if record.latch.observe(&record.status.flags) {
            let recovery = card.driver.recovery_sequence(axis, record.status.position);
            if !recovery.is_empty() {
                warn!(
                    "{}: axis {} hit {} limit at {}, recovering",
                    card.name,
                    axis,
                    if record.status.flags.direction.is_positive() { "plus" } else { "minus" },
                    record.status.position
                );
                if let Err(e) = card.send(axis, &recovery, false) {
                    error!("{}: axis {} limit recovery failed: {}", card.name, axis, e);
                }
            }
        }

        let flags = record.status.flags;
        let mut finished = false;
        if let Some(motion) = record.status.pending_motion.as_mut() {
            if flags.done || verdict.ls_active {
                if let Some(post) = motion.post_move_command.take() {
                    debug!("{}: axis {} post-move {:?}", card.name, axis, post);
                    let post = MotionPrimitive::Raw(post);
                    if let Err(e) = card.send(axis, std::slice::from_ref(&post), false) {
                        error!("{}: axis {} post-move command failed: {}", card.name, axis, e);
                    }
                }
            }
            finished = flags.done || verdict.ls_active || flags.problem;
        }
        if finished {
            record.status.pending_motion = None;
        }

        let refresh = slot.refresh.swap(false, Ordering::AcqRel);
        publish(slot, &record.status, finished, verdict.retry_worthy || refresh);
        AxisPoll::Updated
    }
}

/// Locks the channel for exactly one round trip.
fn round_trip<T>(
    card: &Card,
    op: impl FnOnce(&mut dyn TransportChannel) -> Result<T, TransportError>,
) -> Result<T, TransportError> {
    let mut channel = card.channel.lock();
    op(&mut **channel)
}

/// One sample round. Every query counts towards the single outcome.
fn sample_axis(card: &Card, axis: usize) -> Result<AxisSample, TransportError> {
    let driver = card.driver.as_ref();
    let timeout = card.timeout;
    let mut sample = AxisSample::default();

    round_trip(card, |channel| driver.query_status(channel, axis, &mut sample, timeout))?;
    round_trip(card, |channel| driver.query_position(channel, axis, &mut sample, timeout))?;
    round_trip(card, |channel| driver.query_auxiliary(channel, axis, &mut sample, timeout))?;

    Ok(sample)
}

/// Publishes a snapshot; watchers are only woken when `notify` is set.
fn publish(slot: &AxisSlot, status: &AxisStatus, finished: bool, notify: bool) {
    let mut snapshot = status.clone();
    if finished {
        snapshot.flags.done = true;
    }
    slot.status.send_if_modified(|current| {
        *current = snapshot;
        notify || finished
    });
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("card", &self.card.name)
            .field("health", &self.health)
            .field("active", &self.active)
            .finish()
    }
}

