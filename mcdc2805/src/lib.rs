//! Faulhaber MCDC-2805 motion controllers chained on one ASCII line.
//!
//! Commands are prefixed with the node number of the axis. The controller
//! has no usable done bit for jogs, so done comes from the velocity readback.

use std::time::Duration;

use motion_engine::{
    AxisSample, Capabilities, CommandFormatter, FormatError, Frame, MotionPrimitive, StatusQuery,
};
use tracing::{debug, warn};
use utilities::{TransportChannel, TransportError, line::LineCodec};

const IDENTIFY_ATTEMPTS: usize = 3;

/// Sent to every node once it has identified itself: RS-232 velocity
/// control, the fault pin as limit input, hard blocking on both limits and
/// the homing sequence on input 1.
const SETUP: &[&str] = &[
    "SOR 0", "REFIN", "HP7", "HB6", "HD2", "HL1", "HA1", "CAHOSEQ",
];

#[derive(Debug, Clone)]
pub struct Mcdc2805 {
    codec: LineCodec,
    steps_per_rev: Vec<u32>,
}

impl Mcdc2805 {
    /// One entry per node, in node order.
    pub fn new(steps_per_rev: &[u32]) -> Self {
        Self {
            codec: LineCodec::default(),
            steps_per_rev: steps_per_rev.iter().map(|steps| (*steps).max(1)).collect(),
        }
    }

    fn steps_per_rev(&self, axis: usize) -> Result<u32, FormatError> {
        self.steps_per_rev
            .get(axis)
            .copied()
            .ok_or(FormatError::UnknownAxis(axis))
    }

    fn rpm(&self, axis: usize, velocity: f64) -> Result<i32, FormatError> {
        let srev = self.steps_per_rev(axis)?;
        Ok((velocity / f64::from(srev) * 60.0).round() as i32)
    }

    fn gain(gain: f64) -> Result<i64, FormatError> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(FormatError::OutOfRange(format!("gain {gain} outside 0..1")));
        }
        Ok((gain * 255.0).round() as i64)
    }

    fn query(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        command: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        self.codec.query(channel, &format!("{axis}{command}"), timeout)
    }
}

fn flag(reply: &str, index: usize) -> bool {
    reply.as_bytes().get(index) == Some(&b'1')
}

fn number(reply: &str, command: &str) -> Result<i32, TransportError> {
    reply
        .trim()
        .parse::<f64>()
        .map(|value| value.round() as i32)
        .map_err(|_| TransportError::Protocol(format!("{command} reply {reply:?} is not a number")))
}

impl CommandFormatter for Mcdc2805 {
    fn format(&self, axis: usize, primitive: &MotionPrimitive) -> Result<Vec<Frame>, FormatError> {
        let srev = self.steps_per_rev(axis)?;
        let encres = format!("ENCRES{srev}");

        let commands = match primitive {
            MotionPrimitive::MoveAbsolute(position) => vec![format!("LA {position}")],
            MotionPrimitive::MoveRelative(delta) => vec![format!("LR {delta}")],
            MotionPrimitive::HomeForward { velocity } => {
                let rpm = self.rpm(axis, *velocity)?;
                vec![encres, format!("HOSP{rpm}"), "GOHOSEQ".to_string()]
            }
            MotionPrimitive::HomeReverse { velocity } => {
                let rpm = -self.rpm(axis, *velocity)?;
                vec![encres, format!("HOSP{rpm}"), "GOHOSEQ".to_string()]
            }
            MotionPrimitive::Jog { velocity } | MotionPrimitive::JogVelocity { velocity } => {
                let rpm = self.rpm(axis, *velocity)?;
                vec![encres, format!("SP {rpm}"), format!("V {rpm}")]
            }
            MotionPrimitive::Stop => vec!["V 0".to_string()],
            MotionPrimitive::Go => vec!["M".to_string()],
            MotionPrimitive::LoadPosition(position) => vec![format!("HO {position}")],
            MotionPrimitive::SetVelocity(velocity) => {
                let rpm = self.rpm(axis, *velocity)?;
                vec![encres, format!("SP {rpm}")]
            }
            // revolutions per second squared
            MotionPrimitive::SetAcceleration(acceleration) => {
                let revs = (acceleration / f64::from(srev)).round() as i64;
                vec![encres, format!("AC {revs}")]
            }
            MotionPrimitive::SetPGain(gain) => vec![format!("POR {}", Self::gain(*gain)?)],
            MotionPrimitive::SetIGain(gain) => vec![format!("I {}", Self::gain(*gain)?)],
            MotionPrimitive::EnableTorque => vec!["EN".to_string()],
            MotionPrimitive::DisableTorque => vec!["DI".to_string()],
            MotionPrimitive::Raw(command) => vec![command.clone()],
            MotionPrimitive::SetBaseVelocity(_)
            | MotionPrimitive::SetDGain(_)
            | MotionPrimitive::SetHighLimit(_)
            | MotionPrimitive::SetLowLimit(_)
            | MotionPrimitive::GetInfo => Vec::new(),
        };

        commands
            .iter()
            .map(|command| self.frame_raw(axis, command))
            .collect()
    }

    fn frame_raw(&self, axis: usize, command: &str) -> Result<Frame, FormatError> {
        self.steps_per_rev(axis)?;
        Ok(self.codec.frame(&format!("{axis}{command}")))
    }
}

impl StatusQuery for Mcdc2805 {
    /// Reports the version string of node 0 after every node has answered
    /// and been configured.
    fn identify(
        &self,
        channel: &mut dyn TransportChannel,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        channel.flush()?;

        let mut ident = None;
        for axis in 0..self.steps_per_rev.len() {
            let mut attempt = 0;
            let version = loop {
                attempt += 1;
                match self.query(channel, axis, "VER", timeout) {
                    Ok(version) => break version,
                    Err(e) if attempt < IDENTIFY_ATTEMPTS => {
                        warn!("MCDC node {} did not answer VER ({}), retrying", axis, e);
                    }
                    Err(e) => return Err(e),
                }
            };
            debug!("MCDC node {}: {}", axis, version);
            if ident.is_none() {
                ident = Some(version);
            }

            for command in SETUP {
                self.codec.send(channel, &format!("{axis}{command}"), timeout)?;
            }
        }

        ident.ok_or_else(|| TransportError::Protocol("No MCDC nodes configured".to_string()))
    }

    fn query_status(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let reply = self.query(channel, axis, "GST", timeout)?;
        // [4] is "position reached", which never sets for jogs
        sample.at_home = flag(&reply, 6);
        Ok(())
    }

    fn query_position(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let reply = self.query(channel, axis, "POS", timeout)?;
        let position = number(&reply, "POS")?;
        sample.position = position;
        sample.encoder_position = Some(position);
        Ok(())
    }

    fn query_auxiliary(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let switches = self.query(channel, axis, "GAST", timeout)?;
        sample.plus_limit = flag(&switches, 0);
        sample.minus_limit = flag(&switches, 1);

        let velocity = self.query(channel, axis, "GV", timeout)?;
        sample.velocity = Some(number(&velocity, "GV")?.abs());
        Ok(())
    }

    /// Re-targets the axis at where it stopped, so releasing the switch does
    /// not resume the blocked move.
    fn recovery_sequence(&self, _axis: usize, position: i32) -> Vec<MotionPrimitive> {
        vec![MotionPrimitive::MoveAbsolute(position), MotionPrimitive::Go]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            velocity_done: true,
            gain_support: true,
        }
    }
}
