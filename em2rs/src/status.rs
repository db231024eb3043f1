use std::ops::{Add, AddAssign};

use bitflags::bitflags;

bitflags!(
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MotionStatus: u8 {
        const FAULT = 0b00000001;
        const ENABLED = 0b00000010;
        const RUNNING = 0b00000100;
        const COMMAND_COMPLETE = 0b00001000;
        const PATH_COMPLETE = 0b00010000;
        const HOMING_COMPLETE = 0b00100000;
        const LIMIT_ACTIVE = 0b01000000;
        const EMERGENCY_STOP = 0b10000000;
    }
);

impl MotionStatus {
    pub fn is_faulted(self) -> bool {
        self.intersects(MotionStatus::FAULT | MotionStatus::EMERGENCY_STOP)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitSwitch {
    #[default]
    None,
    Low,
    High,
    Both,
}

impl LimitSwitch {
    pub fn low(self) -> bool {
        matches!(self, LimitSwitch::Low | LimitSwitch::Both)
    }

    pub fn high(self) -> bool {
        matches!(self, LimitSwitch::High | LimitSwitch::Both)
    }
}

impl Add for LimitSwitch {
    type Output = LimitSwitch;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (lhs, LimitSwitch::None) => lhs,
            (LimitSwitch::None, rhs) => rhs,
            (LimitSwitch::Low, LimitSwitch::Low) => LimitSwitch::Low,
            (LimitSwitch::High, LimitSwitch::High) => LimitSwitch::High,
            _ => LimitSwitch::Both,
        }
    }
}

impl AddAssign for LimitSwitch {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_combine() {
        let mut switch = LimitSwitch::None;
        switch += LimitSwitch::Low;
        assert_eq!(switch, LimitSwitch::Low);
        switch += LimitSwitch::High;
        assert_eq!(switch, LimitSwitch::Both);
        assert!(switch.low() && switch.high());

        assert_eq!(LimitSwitch::High + LimitSwitch::None, LimitSwitch::High);
        assert_eq!(LimitSwitch::Both + LimitSwitch::Low, LimitSwitch::Both);
    }

    #[test]
    fn emergency_stop_counts_as_fault() {
        assert!(MotionStatus::EMERGENCY_STOP.is_faulted());
        assert!(!(MotionStatus::ENABLED | MotionStatus::RUNNING).is_faulted());
    }
}
