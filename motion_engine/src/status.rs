use std::time::Instant;

use crate::primitive::MessageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Positive,
    Negative,
}

impl Direction {
    pub fn is_positive(self) -> bool {
        self == Direction::Positive
    }

    pub fn from_delta(new: i32, previous: i32) -> Self {
        if new >= previous {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    /// Applies the direction to a magnitude reported by the controller.
    pub fn signed(self, magnitude: i32) -> i32 {
        match self {
            Direction::Positive => magnitude,
            Direction::Negative => -magnitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags {
    pub done: bool,
    pub direction: Direction,
    pub plus_limit: bool,
    pub minus_limit: bool,
    pub at_home: bool,
    pub homed: bool,
    pub power_on: bool,
    pub problem: bool,
    pub comm_error: bool,
    pub gain_support: bool,
    pub encoder_present: bool,
    pub moving: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotionTarget {
    Position(i32),
    Velocity(f64),
    Home(Direction),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionRequest {
    pub target: MotionTarget,
    pub relative: bool,
    pub post_move_command: Option<String>,
    pub kind: MessageType,
    pub issued_at: Instant,
}

impl MotionRequest {
    /// Velocity-mode motions never reach a commanded position, so only a
    /// zero velocity readback ends them.
    pub fn is_velocity_mode(&self) -> bool {
        self.kind == MessageType::Velocity || matches!(self.target, MotionTarget::Velocity(_))
    }
}

/// Snapshot of one axis as last observed by the poller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AxisStatus {
    pub position: i32,
    pub encoder_position: i32,
    pub velocity: i32,
    pub flags: StatusFlags,
    pub no_motion_count: u32,
    pub pending_motion: Option<MotionRequest>,
}

impl AxisStatus {
    pub fn new(encoder_present: bool, gain_support: bool) -> Self {
        Self {
            flags: StatusFlags {
                encoder_present,
                gain_support,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.flags.done
    }

    pub fn has_pending_motion(&self) -> bool {
        self.pending_motion.is_some()
    }
}

/// Raw readings gathered by the driver during one sample round.
///
/// Fields the controller cannot report stay `None`/`false`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisSample {
    pub position: i32,
    pub encoder_position: Option<i32>,
    /// Velocity magnitude.
    pub velocity: Option<i32>,
    pub native_done: Option<bool>,
    pub plus_limit: bool,
    pub minus_limit: bool,
    pub at_home: bool,
    pub homed: bool,
    pub power_on: bool,
    pub fault: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_delta_treats_equal_as_positive() {
        assert_eq!(Direction::from_delta(1050, 1000), Direction::Positive);
        assert_eq!(Direction::from_delta(1000, 1000), Direction::Positive);
        assert_eq!(Direction::from_delta(990, 1000), Direction::Negative);
        assert_eq!(Direction::Negative.signed(25), -25);
    }

    #[test]
    fn jog_requests_are_velocity_mode() {
        let request = MotionRequest {
            target: MotionTarget::Velocity(-200.0),
            relative: false,
            post_move_command: None,
            kind: MessageType::Velocity,
            issued_at: Instant::now(),
        };
        assert!(request.is_velocity_mode());

        let request = MotionRequest {
            target: MotionTarget::Position(100),
            kind: MessageType::Motion,
            ..request
        };
        assert!(!request.is_velocity_mode());
    }
}
