//! Leadshine EM2RS stepper drives on a shared RS-485 Modbus line.
//!
//! Every axis is one drive with its own slave id. Moves run through PR0 of the
//! drive's path table: the segment registers are written in one request, then
//! the motion control register triggers it.

mod status;

use std::time::Duration;

use motion_engine::{
    AxisSample, Capabilities, CommandFormatter, FormatError, Frame, MotionPrimitive, StatusQuery,
};
use tracing::debug;
use utilities::{ChannelIo, TransportChannel, TransportError, modbus::Modbus};

pub use status::{LimitSwitch, MotionStatus};

const MOTION_CONTROL_REG: u16 = 0x6002;
const PR0_BASE_REG: u16 = 0x6200;
const PR0_VELOCITY_REG: u16 = 0x6203;
const PR0_ACCELERATION_REG: u16 = 0x6204;
const PR0_DECELERATION_REG: u16 = 0x6205;
const HOME_MODE_REG: u16 = 0x600A;
const HOME_SPEED_REG: u16 = 0x600F;
const POSITION_REG: u16 = 0x602C;
const MOTION_STATUS_REG: u16 = 0x1003;
const CONTROL_WORD_REG: u16 = 0x1801;
const SI_STATUS_REG: u16 = 0x0179;

const TRIGGER_PR0: u16 = 0x10;
const TRIGGER_HOMING: u16 = 0x20;
const SET_ZERO: u16 = 0x21;
const EMERGENCY_STOP: u16 = 0x40;
const ALARM_RESET: u16 = 0x1111;

const MODE_ABSOLUTE: u16 = 0x0001;
const MODE_VELOCITY: u16 = 0x0002;
const MODE_RELATIVE: u16 = 0x0041;

const MAX_RPM: f64 = 3000.0;

/// Wiring of one drive on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Em2rsAxis {
    pub address: u8,
    /// SI input index of the low (minus) limit switch.
    pub low_limit: u8,
    /// SI input index of the high (plus) limit switch.
    pub high_limit: u8,
}

#[derive(Debug, Clone)]
struct Drive {
    client: Modbus,
    low_limit: u8,
    high_limit: u8,
}

#[derive(Debug, Clone)]
pub struct Em2rs {
    drives: Vec<Drive>,
    steps_per_rev: u32,
}

impl Em2rs {
    pub fn new(axes: &[Em2rsAxis], steps_per_rev: u32) -> Self {
        let drives = axes
            .iter()
            .map(|axis| Drive {
                client: Modbus::new(axis.address),
                low_limit: axis.low_limit,
                high_limit: axis.high_limit,
            })
            .collect();

        Self {
            drives,
            steps_per_rev: steps_per_rev.max(1),
        }
    }

    fn drive(&self, axis: usize) -> Result<&Drive, FormatError> {
        self.drives.get(axis).ok_or(FormatError::UnknownAxis(axis))
    }

    /// Steps per second to signed drive rpm.
    fn rpm(&self, velocity: f64) -> Result<i16, FormatError> {
        let rpm = (velocity * 60.0 / self.steps_per_rev as f64).round();
        if !rpm.is_finite() || rpm.abs() > MAX_RPM {
            return Err(FormatError::OutOfRange(format!(
                "velocity {velocity} steps/s exceeds {MAX_RPM} rpm"
            )));
        }
        Ok(rpm as i16)
    }

    /// Steps per second squared to the drive's ramp unit, ms per 1000 rpm.
    fn ramp(&self, acceleration: f64) -> Result<u16, FormatError> {
        let rpm_per_second = acceleration * 60.0 / self.steps_per_rev as f64;
        let ramp = (1_000_000.0 / rpm_per_second).round();
        if !(1.0..=u16::MAX as f64).contains(&ramp) {
            return Err(FormatError::OutOfRange(format!(
                "acceleration {acceleration} steps/s^2"
            )));
        }
        Ok(ramp as u16)
    }

    fn segment(client: &Modbus, values: &[u16]) -> Result<Frame, FormatError> {
        client
            .write_multiple_registers_request(PR0_BASE_REG, values)
            .map_err(|e| FormatError::Malformed(e.to_string()))
    }

    fn read(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, TransportError> {
        let drive = self
            .drive(axis)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let mut io = ChannelIo::new(channel, timeout);
        Ok(drive.client.read_holding_registers(&mut io, address, count)?)
    }
}

fn split(position: i32) -> [u16; 2] {
    let bytes = position.to_be_bytes();
    [
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

fn parse_register(text: &str) -> Option<u16> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl CommandFormatter for Em2rs {
    fn format(&self, axis: usize, primitive: &MotionPrimitive) -> Result<Vec<Frame>, FormatError> {
        let client = &self.drive(axis)?.client;
        let control = |command| client.write_single_register_request(MOTION_CONTROL_REG, command);

        let frames = match primitive {
            MotionPrimitive::MoveAbsolute(position) => {
                let [high, low] = split(*position);
                vec![
                    Self::segment(client, &[MODE_ABSOLUTE, high, low])?,
                    control(TRIGGER_PR0),
                ]
            }
            MotionPrimitive::MoveRelative(delta) => {
                let [high, low] = split(*delta);
                vec![
                    Self::segment(client, &[MODE_RELATIVE, high, low])?,
                    control(TRIGGER_PR0),
                ]
            }
            MotionPrimitive::Jog { velocity } | MotionPrimitive::JogVelocity { velocity } => {
                let rpm = self.rpm(*velocity)?;
                vec![
                    Self::segment(client, &[MODE_VELOCITY, 0, 0, rpm as u16])?,
                    control(TRIGGER_PR0),
                ]
            }
            MotionPrimitive::HomeForward { velocity } | MotionPrimitive::HomeReverse { velocity } => {
                let forward = matches!(primitive, MotionPrimitive::HomeForward { .. });
                let rpm = self.rpm(*velocity)?.unsigned_abs();
                vec![
                    client.write_single_register_request(HOME_MODE_REG, u16::from(forward)),
                    client.write_single_register_request(HOME_SPEED_REG, rpm),
                    control(TRIGGER_HOMING),
                ]
            }
            MotionPrimitive::Stop => vec![control(EMERGENCY_STOP)],
            MotionPrimitive::LoadPosition(0) => vec![control(SET_ZERO)],
            MotionPrimitive::LoadPosition(position) => {
                return Err(FormatError::OutOfRange(format!(
                    "drive can only zero its position, not load {position}"
                )));
            }
            MotionPrimitive::SetVelocity(velocity) => {
                let rpm = self.rpm(*velocity)?.unsigned_abs();
                vec![client.write_single_register_request(PR0_VELOCITY_REG, rpm)]
            }
            MotionPrimitive::SetAcceleration(acceleration) => {
                let ramp = self.ramp(*acceleration)?;
                vec![
                    client.write_single_register_request(PR0_ACCELERATION_REG, ramp),
                    client.write_single_register_request(PR0_DECELERATION_REG, ramp),
                ]
            }
            // clearing the alarm re-enables the drive
            MotionPrimitive::EnableTorque => {
                vec![client.write_single_register_request(CONTROL_WORD_REG, ALARM_RESET)]
            }
            MotionPrimitive::DisableTorque => {
                return Err(FormatError::Unsupported("DisableTorque"));
            }
            MotionPrimitive::Raw(command) => vec![self.frame_raw(axis, command)?],
            MotionPrimitive::Go
            | MotionPrimitive::GetInfo
            | MotionPrimitive::SetBaseVelocity(_)
            | MotionPrimitive::SetPGain(_)
            | MotionPrimitive::SetIGain(_)
            | MotionPrimitive::SetDGain(_)
            | MotionPrimitive::SetHighLimit(_)
            | MotionPrimitive::SetLowLimit(_) => Vec::new(),
        };

        Ok(frames)
    }

    /// Raw commands are register writes written as `register=value`, either
    /// part decimal or `0x` hex.
    fn frame_raw(&self, axis: usize, command: &str) -> Result<Frame, FormatError> {
        let client = &self.drive(axis)?.client;
        let (register, value) = command
            .split_once('=')
            .and_then(|(register, value)| Some((parse_register(register)?, parse_register(value)?)))
            .ok_or_else(|| FormatError::Malformed(command.to_string()))?;

        Ok(client.write_single_register_request(register, value))
    }

    /// Reads back the drive's acknowledgement of each write.
    fn dispatch(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let drive = self
            .drive(axis)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        debug!("em2rs {}: -> {:02X?}", drive.client.id(), frame);

        let mut io = ChannelIo::new(channel, timeout);
        drive.client.transact(&mut io, frame)?;
        Ok(())
    }
}

impl StatusQuery for Em2rs {
    fn identify(
        &self,
        channel: &mut dyn TransportChannel,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        for axis in 0..self.drives.len() {
            self.read(channel, axis, MOTION_STATUS_REG, 1, timeout)?;
        }

        let ids: Vec<String> = self
            .drives
            .iter()
            .map(|drive| drive.client.id().to_string())
            .collect();
        Ok(format!("EM2RS x{} (ids {})", self.drives.len(), ids.join(",")))
    }

    fn query_status(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let word = self.read(channel, axis, MOTION_STATUS_REG, 1, timeout)?[0];
        let status = MotionStatus::from_bits_truncate(word as u8);
        debug!("em2rs axis {}: status {:?}", axis, status);

        sample.native_done = Some(!status.contains(MotionStatus::RUNNING));
        sample.fault = status.is_faulted();
        sample.power_on = status.contains(MotionStatus::ENABLED);
        sample.homed = status.contains(MotionStatus::HOMING_COMPLETE);
        Ok(())
    }

    fn query_position(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let words = self.read(channel, axis, POSITION_REG, 2, timeout)?;
        let position = ((u32::from(words[0]) << 16) | u32::from(words[1])) as i32;

        sample.position = position;
        sample.encoder_position = Some(position);
        Ok(())
    }

    /// Limit switches are wired to SI inputs and read separately.
    fn query_auxiliary(
        &self,
        channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let inputs = self.read(channel, axis, SI_STATUS_REG, 1, timeout)?[0].to_be_bytes()[1];
        let drive = self
            .drive(axis)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let input = |index: u8| -> Result<bool, TransportError> {
            if index >= 8 {
                return Err(TransportError::Protocol(format!(
                    "SI index {index} must be between 0 and 7"
                )));
            }
            Ok(inputs & (1 << index) != 0)
        };

        let mut switches = LimitSwitch::None;
        if input(drive.low_limit)? {
            switches += LimitSwitch::Low;
        }
        if input(drive.high_limit)? {
            switches += LimitSwitch::High;
        }

        sample.minus_limit = switches.low();
        sample.plus_limit = switches.high();
        Ok(())
    }

    /// A limit strike latches an alarm that blocks further moves.
    fn recovery_sequence(&self, _axis: usize, _position: i32) -> Vec<MotionPrimitive> {
        vec![MotionPrimitive::EnableTorque]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_engine::mock::MockChannel;
    use utilities::modbus::calculate_crc16;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn drive() -> Em2rs {
        Em2rs::new(
            &[
                Em2rsAxis {
                    address: 1,
                    low_limit: 0,
                    high_limit: 1,
                },
                Em2rsAxis {
                    address: 2,
                    low_limit: 2,
                    high_limit: 3,
                },
            ],
            10_000,
        )
    }

    fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
        let crc = calculate_crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn registers(id: u8, values: &[u16]) -> Vec<u8> {
        let mut frame = vec![id, 0x03, (values.len() * 2) as u8];
        for value in values {
            frame.extend_from_slice(&value.to_be_bytes());
        }
        with_crc(frame)
    }

    #[test]
    fn relative_move_writes_the_segment_then_triggers() {
        let frames = drive().format(0, &MotionPrimitive::MoveRelative(-1000)).unwrap();
        let client = Modbus::new(1);

        assert_eq!(
            frames,
            vec![
                client
                    .write_multiple_registers_request(0x6200, &[0x0041, 0xFFFF, 0xFC18])
                    .unwrap(),
                client.write_single_register_request(0x6002, 0x10),
            ]
        );
    }

    #[test]
    fn velocities_are_converted_to_rpm() {
        let em2rs = drive();
        let frames = em2rs.format(1, &MotionPrimitive::Jog { velocity: -5000.0 }).unwrap();
        let expected = Modbus::new(2)
            .write_multiple_registers_request(0x6200, &[0x0002, 0, 0, (-30i16) as u16])
            .unwrap();
        assert_eq!(frames[0], expected);

        let frames = em2rs.format(0, &MotionPrimitive::SetAcceleration(100_000.0)).unwrap();
        assert_eq!(frames[0], Modbus::new(1).write_single_register_request(0x6204, 1667));
        assert_eq!(frames[1], Modbus::new(1).write_single_register_request(0x6205, 1667));

        assert!(matches!(
            em2rs.format(0, &MotionPrimitive::SetVelocity(1e9)),
            Err(FormatError::OutOfRange(_))
        ));
    }

    #[test]
    fn unsupported_and_silent_primitives() {
        let em2rs = drive();
        assert!(em2rs.format(0, &MotionPrimitive::Go).unwrap().is_empty());
        assert!(em2rs.format(0, &MotionPrimitive::SetPGain(0.5)).unwrap().is_empty());
        assert!(matches!(
            em2rs.format(0, &MotionPrimitive::DisableTorque),
            Err(FormatError::Unsupported(_))
        ));
        assert!(matches!(
            em2rs.format(0, &MotionPrimitive::LoadPosition(12)),
            Err(FormatError::OutOfRange(_))
        ));
        assert_eq!(em2rs.format(0, &MotionPrimitive::LoadPosition(0)).unwrap().len(), 1);
        assert!(matches!(
            em2rs.format(4, &MotionPrimitive::Stop),
            Err(FormatError::UnknownAxis(4))
        ));
    }

    #[test]
    fn raw_commands_are_register_writes() {
        let em2rs = drive();
        assert_eq!(
            em2rs.frame_raw(0, "0x1801=0x1111").unwrap(),
            Modbus::new(1).write_single_register_request(0x1801, 0x1111)
        );
        assert_eq!(
            em2rs.frame_raw(1, "24578 = 16").unwrap(),
            Modbus::new(2).write_single_register_request(0x6002, 0x10)
        );
        assert!(matches!(em2rs.frame_raw(0, "EN"), Err(FormatError::Malformed(_))));
    }

    #[test]
    fn dispatch_waits_for_the_echo() {
        let em2rs = drive();
        let mut channel = MockChannel::new();
        let frame = Modbus::new(1).write_single_register_request(0x6002, 0x40);

        channel.push_reply(&frame);
        em2rs.dispatch(&mut channel, 0, &frame, TIMEOUT).unwrap();
        assert_eq!(channel.written(), frame);

        let err = em2rs.dispatch(&mut channel, 0, &frame, TIMEOUT).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn status_word_feeds_the_sample() {
        let em2rs = drive();
        let mut channel = MockChannel::new();
        let mut sample = AxisSample::default();

        let word = (MotionStatus::ENABLED | MotionStatus::RUNNING).bits() as u16;
        channel.push_reply(&registers(1, &[word]));
        em2rs.query_status(&mut channel, 0, &mut sample, TIMEOUT).unwrap();
        assert_eq!(sample.native_done, Some(false));
        assert!(sample.power_on);
        assert!(!sample.fault);

        let word = (MotionStatus::FAULT | MotionStatus::HOMING_COMPLETE).bits() as u16;
        channel.push_reply(&registers(1, &[word]));
        em2rs.query_status(&mut channel, 0, &mut sample, TIMEOUT).unwrap();
        assert_eq!(sample.native_done, Some(true));
        assert!(sample.fault);
        assert!(sample.homed);
        assert!(!sample.power_on);
    }

    #[test]
    fn position_and_limits() {
        let em2rs = drive();
        let mut channel = MockChannel::new();
        let mut sample = AxisSample::default();

        channel.push_reply(&registers(2, &[0xFFFF, 0xFF38]));
        em2rs.query_position(&mut channel, 1, &mut sample, TIMEOUT).unwrap();
        assert_eq!(sample.position, -200);
        assert_eq!(sample.encoder_position, Some(-200));

        // SI3 set: the high switch of drive 2
        channel.push_reply(&registers(2, &[0b1000]));
        em2rs.query_auxiliary(&mut channel, 1, &mut sample, TIMEOUT).unwrap();
        assert!(sample.plus_limit);
        assert!(!sample.minus_limit);
    }

    #[test]
    fn reply_from_the_wrong_drive_is_rejected() {
        let em2rs = drive();
        let mut channel = MockChannel::new();
        channel.push_reply(&registers(2, &[0]));

        let err = em2rs
            .query_status(&mut channel, 0, &mut AxisSample::default(), TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
