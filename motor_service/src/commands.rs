use std::fmt;

use motion_engine::{AxisStatus, MotionPrimitive};

const DEFAULT_HOME_VELOCITY: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisProperty {
    Position,
    Status,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move {
        axis: usize,
        position: i32,
    },
    MoveRelative {
        axis: usize,
        delta: i32,
    },
    Jog {
        axis: usize,
        velocity: f64,
    },
    Home {
        axis: usize,
        forward: bool,
        velocity: f64,
    },
    Stop {
        axis: usize,
    },
    Get {
        axis: usize,
        property: AxisProperty,
    },
    Period {
        moving_ms: u64,
        idle_ms: u64,
    },
}

impl Command {
    /// Primitives for one transaction, or `None` for queries.
    pub fn primitives(&self) -> Option<(usize, Vec<MotionPrimitive>)> {
        let (axis, primitives) = match *self {
            Command::Move { axis, position } => (
                axis,
                vec![MotionPrimitive::MoveAbsolute(position), MotionPrimitive::Go],
            ),
            Command::MoveRelative { axis, delta } => (
                axis,
                vec![MotionPrimitive::MoveRelative(delta), MotionPrimitive::Go],
            ),
            Command::Jog { axis, velocity } => (axis, vec![MotionPrimitive::Jog { velocity }]),
            Command::Home {
                axis,
                forward: true,
                velocity,
            } => (axis, vec![MotionPrimitive::HomeForward { velocity }]),
            Command::Home {
                axis,
                forward: false,
                velocity,
            } => (axis, vec![MotionPrimitive::HomeReverse { velocity }]),
            Command::Stop { axis } => (axis, vec![MotionPrimitive::Stop]),
            Command::Get { .. } | Command::Period { .. } => return None,
        };
        Some((axis, primitives))
    }
}

/// A command addressed to one card, by name or registry index.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub card: String,
    pub command: Command,
}

pub enum Response {
    Success,
    Position(i32),
    Done(bool),
    Status(AxisStatus),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success => write!(f, "OK"),
            Response::Position(position) => write!(f, "Position: {position}"),
            Response::Done(done) => write!(f, "Done: {done}"),
            Response::Status(status) => {
                let flags = &status.flags;
                write!(
                    f,
                    "Status: position={} encoder={} velocity={} done={} plus_limit={} minus_limit={} home={} problem={} comm_error={}",
                    status.position,
                    status.encoder_position,
                    status.velocity,
                    flags.done,
                    flags.plus_limit,
                    flags.minus_limit,
                    flags.at_home,
                    flags.problem,
                    flags.comm_error,
                )
            }
        }
    }
}

pub fn parse_command(cmd_str: &str) -> Option<Request> {
    let parts: Vec<&str> = cmd_str.trim().split(':').collect();
    if parts.len() < 3 {
        return None;
    }

    let card = parts[1].to_string();
    let axis = || parts[2].parse::<usize>().ok();

    let command = match (parts[0], parts.len()) {
        ("move", 4) => Command::Move {
            axis: axis()?,
            position: parts[3].parse().ok()?,
        },
        ("moverel", 4) => Command::MoveRelative {
            axis: axis()?,
            delta: parts[3].parse().ok()?,
        },
        ("jog", 4) => Command::Jog {
            axis: axis()?,
            velocity: parts[3].parse().ok()?,
        },
        ("home", 4 | 5) => {
            let forward = match parts[3] {
                "forward" => true,
                "reverse" => false,
                _ => return None,
            };
            let velocity = match parts.get(4) {
                Some(velocity) => velocity.parse().ok()?,
                None => DEFAULT_HOME_VELOCITY,
            };
            Command::Home {
                axis: axis()?,
                forward,
                velocity,
            }
        }
        ("stop", 3) => Command::Stop { axis: axis()? },
        ("get", 4) => {
            let property = match parts[3] {
                "position" => AxisProperty::Position,
                "status" => AxisProperty::Status,
                "done" => AxisProperty::Done,
                _ => return None,
            };
            Command::Get {
                axis: axis()?,
                property,
            }
        }
        ("period", 4) => Command::Period {
            moving_ms: parts[2].parse().ok()?,
            idle_ms: parts[3].parse().ok()?,
        },
        _ => return None,
    };

    Some(Request { card, command })
}
