use crate::status::{Direction, StatusFlags};

/// A limit only stops motion when the axis travels towards it.
///
/// The travel direction is the one inferred from position deltas, so an axis
/// still decelerating into a limit after its direction bit flipped is not
/// treated as limit-stopped.
pub fn limit_active(flags: &StatusFlags) -> bool {
    match flags.direction {
        Direction::Positive => flags.plus_limit,
        Direction::Negative => flags.minus_limit,
    }
}

/// Issues recovery once per limit strike.
///
/// Each side stays latched until its switch flag clears. Position jitter on
/// an engaged switch flips the inferred direction but is not a new strike.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitLatch {
    plus: bool,
    minus: bool,
}

impl LimitLatch {
    /// Returns true on the cycle a strike begins.
    pub fn observe(&mut self, flags: &StatusFlags) -> bool {
        self.plus &= flags.plus_limit;
        self.minus &= flags.minus_limit;

        if !limit_active(flags) {
            return false;
        }
        let latched = match flags.direction {
            Direction::Positive => &mut self.plus,
            Direction::Negative => &mut self.minus,
        };
        !std::mem::replace(latched, true)
    }
}
