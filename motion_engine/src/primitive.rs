use std::fmt;

/// How the engine treats a transaction once it is written.
///
/// Ordered: a transaction takes the greatest type of the primitives appended
/// to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MessageType {
    #[default]
    Undefined,
    /// Fire and forget.
    Immediate,
    /// Terminates an active motion; takes the priority lane.
    MoveTerm,
    /// Attaches a position motion to the axis.
    Motion,
    /// Attaches a velocity motion that runs until stopped.
    Velocity,
    /// Requests a status refresh on the next poll turn.
    Info,
}

impl MessageType {
    pub fn attaches_motion(self) -> bool {
        matches!(self, MessageType::Motion | MessageType::Velocity)
    }
}

/// Vendor-independent motion command. Velocities are in steps per second,
/// accelerations in steps per second squared.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionPrimitive {
    MoveAbsolute(i32),
    MoveRelative(i32),
    HomeForward { velocity: f64 },
    HomeReverse { velocity: f64 },
    Jog { velocity: f64 },
    JogVelocity { velocity: f64 },
    Stop,
    Go,
    LoadPosition(i32),
    SetBaseVelocity(f64),
    SetVelocity(f64),
    SetAcceleration(f64),
    SetPGain(f64),
    SetIGain(f64),
    SetDGain(f64),
    EnableTorque,
    DisableTorque,
    SetHighLimit(i32),
    SetLowLimit(i32),
    GetInfo,
    /// Controller-specific command text passed through unchanged.
    Raw(String),
}

impl MotionPrimitive {
    pub fn message_type(&self) -> MessageType {
        match self {
            MotionPrimitive::MoveAbsolute(_)
            | MotionPrimitive::MoveRelative(_)
            | MotionPrimitive::HomeForward { .. }
            | MotionPrimitive::HomeReverse { .. } => MessageType::Motion,
            MotionPrimitive::Jog { .. } | MotionPrimitive::JogVelocity { .. } => {
                MessageType::Velocity
            }
            MotionPrimitive::Stop => MessageType::MoveTerm,
            MotionPrimitive::GetInfo => MessageType::Info,
            _ => MessageType::Immediate,
        }
    }

    /// Primitives that receive the pre-motion command and record the
    /// post-motion command.
    pub fn is_motion_class(&self) -> bool {
        matches!(
            self,
            MotionPrimitive::MoveAbsolute(_)
                | MotionPrimitive::MoveRelative(_)
                | MotionPrimitive::HomeForward { .. }
                | MotionPrimitive::HomeReverse { .. }
                | MotionPrimitive::Jog { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            MotionPrimitive::MoveAbsolute(_) => "MoveAbsolute",
            MotionPrimitive::MoveRelative(_) => "MoveRelative",
            MotionPrimitive::HomeForward { .. } => "HomeForward",
            MotionPrimitive::HomeReverse { .. } => "HomeReverse",
            MotionPrimitive::Jog { .. } => "Jog",
            MotionPrimitive::JogVelocity { .. } => "JogVelocity",
            MotionPrimitive::Stop => "Stop",
            MotionPrimitive::Go => "Go",
            MotionPrimitive::LoadPosition(_) => "LoadPosition",
            MotionPrimitive::SetBaseVelocity(_) => "SetBaseVelocity",
            MotionPrimitive::SetVelocity(_) => "SetVelocity",
            MotionPrimitive::SetAcceleration(_) => "SetAcceleration",
            MotionPrimitive::SetPGain(_) => "SetPGain",
            MotionPrimitive::SetIGain(_) => "SetIGain",
            MotionPrimitive::SetDGain(_) => "SetDGain",
            MotionPrimitive::EnableTorque => "EnableTorque",
            MotionPrimitive::DisableTorque => "DisableTorque",
            MotionPrimitive::SetHighLimit(_) => "SetHighLimit",
            MotionPrimitive::SetLowLimit(_) => "SetLowLimit",
            MotionPrimitive::GetInfo => "GetInfo",
            MotionPrimitive::Raw(_) => "Raw",
        }
    }
}

impl fmt::Display for MotionPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionPrimitive::MoveAbsolute(v)
            | MotionPrimitive::MoveRelative(v)
            | MotionPrimitive::LoadPosition(v)
            | MotionPrimitive::SetHighLimit(v)
            | MotionPrimitive::SetLowLimit(v) => write!(f, "{}({})", self.name(), v),
            MotionPrimitive::HomeForward { velocity }
            | MotionPrimitive::HomeReverse { velocity }
            | MotionPrimitive::Jog { velocity }
            | MotionPrimitive::JogVelocity { velocity }
            | MotionPrimitive::SetBaseVelocity(velocity)
            | MotionPrimitive::SetVelocity(velocity)
            | MotionPrimitive::SetAcceleration(velocity)
            | MotionPrimitive::SetPGain(velocity)
            | MotionPrimitive::SetIGain(velocity)
            | MotionPrimitive::SetDGain(velocity) => write!(f, "{}({})", self.name(), velocity),
            MotionPrimitive::Raw(text) => write!(f, "Raw({:?})", text),
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_types_are_ordered() {
        assert!(MessageType::Undefined < MessageType::Immediate);
        assert!(MessageType::Immediate < MessageType::MoveTerm);
        assert!(MessageType::MoveTerm < MessageType::Motion);
        assert!(MessageType::Motion < MessageType::Velocity);
        assert!(MessageType::Velocity < MessageType::Info);
    }

    #[test]
    fn classification() {
        assert_eq!(MotionPrimitive::MoveRelative(5).message_type(), MessageType::Motion);
        assert_eq!(
            MotionPrimitive::Jog { velocity: -10.0 }.message_type(),
            MessageType::Velocity
        );
        assert_eq!(MotionPrimitive::Stop.message_type(), MessageType::MoveTerm);
        assert_eq!(MotionPrimitive::Go.message_type(), MessageType::Immediate);

        assert!(MotionPrimitive::HomeReverse { velocity: 100.0 }.is_motion_class());
        assert!(!MotionPrimitive::JogVelocity { velocity: 1.0 }.is_motion_class());
        assert!(!MotionPrimitive::LoadPosition(0).is_motion_class());
    }

    #[test]
    fn display_includes_arguments() {
        assert_eq!(MotionPrimitive::LoadPosition(1050).to_string(), "LoadPosition(1050)");
        assert_eq!(MotionPrimitive::Stop.to_string(), "Stop");
        assert_eq!(MotionPrimitive::Raw("EN".into()).to_string(), "Raw(\"EN\")");
    }
}
