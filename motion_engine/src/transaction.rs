use std::{
    sync::atomic::Ordering,
    time::Instant,
};

use tracing::{debug, warn};

use crate::{
    card::{Card, Signal},
    driver::Frame,
    error::EngineError,
    primitive::{MessageType, MotionPrimitive},
    status::{Direction, MotionRequest, MotionTarget},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Build,
}

/// Result of a transaction that reached the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub kind: MessageType,
    pub bytes_written: usize,
}

/// Commands for one axis, accumulated and written as a unit.
///
/// Only one transaction per card can be in build state. Dropping a
/// transaction without ending it discards it.
pub struct Transaction<'a> {
    card: &'a Card,
    axis: usize,
    state: TransactionState,
    frames: Vec<Frame>,
    size: usize,
    kind: MessageType,
    target: Option<(MotionTarget, bool)>,
    post_move: Option<String>,
    pre_motion_sent: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn start(card: &'a Card, axis: usize) -> Result<Self, EngineError> {
        card.axis(axis)?;
        if !card.is_online() {
            return Err(EngineError::CardOffline(card.name.clone()));
        }

        card.building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::Sequence("another transaction is being built on this card"))?;

        Ok(Self {
            card,
            axis,
            state: TransactionState::Build,
            frames: Vec::new(),
            size: 0,
            kind: MessageType::Undefined,
            target: None,
            post_move: None,
            pre_motion_sent: false,
        })
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn append(&mut self, primitive: MotionPrimitive) -> Result<(), EngineError> {
        if self.state != TransactionState::Build {
            return Err(EngineError::Sequence("append outside of build state"));
        }

        let card = self.card;
        let slot = card.axis(self.axis)?;

        let mut frames = Vec::new();
        let motion_class = primitive.is_motion_class();
        if motion_class && !self.pre_motion_sent {
            if let Some(pre) = slot.config.pre_motion.as_deref().filter(|pre| !pre.is_empty()) {
                frames.push(card.driver.frame_raw(self.axis, pre)?);
            }
        }
        frames.extend(card.format(self.axis, &primitive)?);

        let size = self.size + frames.iter().map(Vec::len).sum::<usize>();
        let max = card.driver.max_message_size();
        if size > max {
            warn!(
                "{}: {} overflows axis {} message ({} > {} bytes), transaction dropped",
                card.name, primitive, self.axis, size, max
            );
            self.abandon();
            return Err(EngineError::BufferOverflow { size, max });
        }

        if motion_class {
            self.pre_motion_sent = true;
            if let Some(post) = &slot.config.post_motion {
                self.post_move = Some(post.clone());
            }
        }
        if let Some(target) = motion_target(&primitive) {
            self.target = Some(target);
        }
        self.kind = self.kind.max(primitive.message_type());
        self.size = size;
        self.frames.extend(frames);
        Ok(())
    }

    pub fn end(mut self) -> Result<Accepted, EngineError> {
        if self.state != TransactionState::Build {
            return Err(EngineError::Sequence("end outside of build state"));
        }

        let card = self.card;
        let slot = card.axis(self.axis)?;
        let priority = self.kind == MessageType::MoveTerm;

        let written = card.write_frames(self.axis, &self.frames, priority);
        self.abandon();
        let bytes_written = written?;

        debug!(
            "{}: axis {} {:?} transaction, {} bytes",
            card.name, self.axis, self.kind, bytes_written
        );

        if let Some((target, relative)) = self.target.take() {
            let request = MotionRequest {
                target,
                relative,
                post_move_command: self.post_move.take(),
                kind: self.kind,
                issued_at: Instant::now(),
            };
            *slot.mailbox.lock() = Some(request);
        }
        if self.kind == MessageType::Info {
            slot.refresh.store(true, Ordering::Release);
        }
        card.signal(Signal::Wake);

        Ok(Accepted {
            kind: self.kind,
            bytes_written,
        })
    }

    fn abandon(&mut self) {
        if self.state == TransactionState::Build {
            self.state = TransactionState::Idle;
            self.frames.clear();
            self.size = 0;
            self.card.building.store(false, Ordering::Release);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn motion_target(primitive: &MotionPrimitive) -> Option<(MotionTarget, bool)> {
    match primitive {
        MotionPrimitive::MoveAbsolute(position) => Some((MotionTarget::Position(*position), false)),
        MotionPrimitive::MoveRelative(delta) => Some((MotionTarget::Position(*delta), true)),
        MotionPrimitive::HomeForward { .. } => Some((MotionTarget::Home(Direction::Positive), false)),
        MotionPrimitive::HomeReverse { .. } => Some((MotionTarget::Home(Direction::Negative), false)),
        MotionPrimitive::Jog { velocity } | MotionPrimitive::JogVelocity { velocity } => {
            Some((MotionTarget::Velocity(*velocity), false))
        }
        _ => None,
    }
}
