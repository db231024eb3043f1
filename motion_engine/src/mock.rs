//! Test doubles for the engine and the vendor driver crates.
//!
//! [`MockChannel`] is a scripted transport that records every write.
//! [`ScriptedDriver`] simulates a small multi-axis controller with an ASCII
//! command set, and can be scripted to return fixed samples or fail queries.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use utilities::{TransportChannel, TransportError};

use crate::{
    driver::{Capabilities, CommandFormatter, DEFAULT_MAX_MESSAGE_SIZE, Frame, StatusQuery},
    error::FormatError,
    primitive::MotionPrimitive,
    status::AxisSample,
};

#[derive(Debug, Default)]
struct ChannelState {
    writes: Vec<Vec<u8>>,
    replies: VecDeque<u8>,
    fail_reads: usize,
}

/// Transport double. Clones share state, so a test keeps one clone and
/// hands the other to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, bytes: &[u8]) {
        self.state.lock().replies.extend(bytes.iter().copied());
    }

    /// The next `count` reads time out even if replies are queued.
    pub fn fail_reads(&self, count: usize) {
        self.state.lock().fail_reads = count;
    }

    /// Every write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().writes.concat()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub fn pending_replies(&self) -> usize {
        self.state.lock().replies.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.writes.clear();
        state.replies.clear();
    }
}

impl TransportChannel for MockChannel {
    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.state.lock().writes.push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(TransportError::Timeout(timeout));
        }

        let mut read = 0;
        while read < buffer.len() {
            match state.replies.pop_front() {
                Some(byte) => {
                    buffer[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        if read == 0 {
            return Err(TransportError::Timeout(timeout));
        }
        Ok(read)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Scripted result of one sample round.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Sample(AxisSample),
    Fail,
}

/// One simulated axis. Positions are in steps, `speed` is steps per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SimAxis {
    pub position: i32,
    pub target: i32,
    pub speed: i32,
    /// Signed jog speed in steps per sample, zero when not jogging.
    pub jog: i32,
    pub minus_travel: Option<i32>,
    pub plus_travel: Option<i32>,
    pub plus_limit: bool,
    pub minus_limit: bool,
    pub fault: bool,
    pub powered: bool,
    pub homed: bool,
    /// Distance covered by the last simulation step.
    pub last_step: i32,
}

impl Default for SimAxis {
    fn default() -> Self {
        Self {
            position: 0,
            target: 0,
            speed: 50,
            jog: 0,
            minus_travel: None,
            plus_travel: None,
            plus_limit: false,
            minus_limit: false,
            fault: false,
            powered: true,
            homed: false,
            last_step: 0,
        }
    }
}

impl SimAxis {
    fn is_moving(&self) -> bool {
        self.jog != 0 || self.position != self.target
    }

    fn advance(&mut self) {
        let before = self.position;
        if self.powered && !self.fault {
            if self.jog != 0 {
                self.position += self.jog;
            } else if self.position != self.target {
                let remaining = self.target - self.position;
                self.position += remaining.signum() * remaining.abs().min(self.speed);
            }
        }

        self.plus_limit = false;
        self.minus_limit = false;
        if let Some(plus) = self.plus_travel.filter(|plus| self.position >= *plus) {
            self.position = plus;
            self.plus_limit = true;
        }
        if let Some(minus) = self.minus_travel.filter(|minus| self.position <= *minus) {
            self.position = minus;
            self.minus_limit = true;
        }
        if self.plus_limit || self.minus_limit {
            self.halt();
        }
        if self.target == 0 && self.position == 0 && !self.is_moving() {
            self.homed = true;
        }

        self.last_step = (self.position - before).abs();
    }

    fn halt(&mut self) {
        self.jog = 0;
        self.target = self.position;
    }
}

#[derive(Debug)]
struct SimState {
    axes: Vec<SimAxis>,
    script: Vec<VecDeque<Step>>,
    commands: Vec<String>,
    ident: Option<String>,
    native_done: bool,
    velocity_done: bool,
    max_message_size: usize,
    latch_fault_on_limit: bool,
    recovery: Option<fn(i32) -> Vec<MotionPrimitive>>,
}

/// Simulated controller speaking a tiny `"<axis> <CMD> [arg]\r"` dialect.
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    state: Arc<Mutex<SimState>>,
}

impl ScriptedDriver {
    pub fn new(axes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                axes: vec![SimAxis::default(); axes],
                script: vec![VecDeque::new(); axes],
                commands: Vec::new(),
                ident: Some("SIM-1 v1.0".to_string()),
                native_done: false,
                velocity_done: false,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                latch_fault_on_limit: false,
                recovery: None,
            })),
        }
    }

    /// Reports a native done bit with every sample.
    pub fn with_native_done(self) -> Self {
        self.state.lock().native_done = true;
        self
    }

    /// Reports velocity and derives done from it.
    pub fn with_velocity_done(self) -> Self {
        self.state.lock().velocity_done = true;
        self
    }

    pub fn with_max_message_size(self, size: usize) -> Self {
        self.state.lock().max_message_size = size;
        self
    }

    /// Limit strikes latch a fault until torque is re-enabled.
    pub fn with_latching_limits(self) -> Self {
        self.state.lock().latch_fault_on_limit = true;
        self
    }

    pub fn with_recovery(self, recovery: fn(i32) -> Vec<MotionPrimitive>) -> Self {
        self.state.lock().recovery = Some(recovery);
        self
    }

    /// Identification fails, so the card stays offline.
    pub fn unidentified(self) -> Self {
        self.state.lock().ident = None;
        self
    }

    pub fn push(&self, axis: usize, step: Step) {
        self.state.lock().script[axis].push_back(step);
    }

    pub fn fail_next(&self, axis: usize, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.script[axis].push_back(Step::Fail);
        }
    }

    pub fn set_position(&self, axis: usize, position: i32) {
        let mut state = self.state.lock();
        let sim = &mut state.axes[axis];
        sim.position = position;
        sim.target = position;
    }

    pub fn set_travel(&self, axis: usize, minus: Option<i32>, plus: Option<i32>) {
        let mut state = self.state.lock();
        state.axes[axis].minus_travel = minus;
        state.axes[axis].plus_travel = plus;
    }

    pub fn set_speed(&self, axis: usize, speed: i32) {
        self.state.lock().axes[axis].speed = speed;
    }

    pub fn axis(&self, axis: usize) -> SimAxis {
        self.state.lock().axes[axis].clone()
    }

    /// Command text of every dispatched frame, terminator stripped.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    fn frame(axis: usize, body: &str) -> Frame {
        format!("{axis} {body}\r").into_bytes()
    }

    fn apply(state: &mut SimState, text: &str) {
        let mut parts = text.split_whitespace();
        let axis = parts.next().and_then(|axis| axis.parse::<usize>().ok());
        let command = parts.next();
        let argument = parts.next().and_then(|arg| arg.parse::<f64>().ok());

        let latch = state.latch_fault_on_limit;
        let Some(sim) = axis.and_then(|axis| state.axes.get_mut(axis)) else {
            return;
        };

        let blocked = latch && sim.fault;
        match (command, argument) {
            (Some("MA"), Some(position)) if !blocked => sim.target = position as i32,
            (Some("MR"), Some(delta)) if !blocked => sim.target = sim.position + delta as i32,
            (Some("JG"), Some(velocity)) if !blocked => {
                sim.jog = (velocity as i32).signum() * sim.speed;
            }
            (Some("HF") | Some("HR"), _) if !blocked => sim.target = 0,
            (Some("ST"), _) => sim.halt(),
            (Some("LP"), Some(position)) => {
                sim.position = position as i32;
                sim.target = position as i32;
            }
            (Some("EN"), _) => {
                sim.powered = true;
                sim.fault = false;
            }
            (Some("DI"), _) => sim.powered = false,
            _ => {}
        }
    }
}

impl CommandFormatter for ScriptedDriver {
    fn format(&self, axis: usize, primitive: &MotionPrimitive) -> Result<Vec<Frame>, FormatError> {
        if axis >= self.state.lock().axes.len() {
            return Err(FormatError::UnknownAxis(axis));
        }

        let body = match primitive {
            MotionPrimitive::MoveAbsolute(position) => format!("MA {position}"),
            MotionPrimitive::MoveRelative(delta) => format!("MR {delta}"),
            MotionPrimitive::HomeForward { velocity } => format!("HF {velocity}"),
            MotionPrimitive::HomeReverse { velocity } => format!("HR {velocity}"),
            MotionPrimitive::Jog { velocity } | MotionPrimitive::JogVelocity { velocity } => {
                format!("JG {velocity}")
            }
            MotionPrimitive::Stop => "ST".to_string(),
            MotionPrimitive::LoadPosition(position) => format!("LP {position}"),
            MotionPrimitive::SetVelocity(velocity) => format!("VE {velocity}"),
            MotionPrimitive::SetBaseVelocity(velocity) => format!("VB {velocity}"),
            MotionPrimitive::SetAcceleration(acceleration) => format!("AC {acceleration}"),
            MotionPrimitive::SetPGain(gain) => format!("KP {gain}"),
            MotionPrimitive::SetIGain(gain) => format!("KI {gain}"),
            MotionPrimitive::SetDGain(gain) => format!("KD {gain}"),
            MotionPrimitive::EnableTorque => "EN".to_string(),
            MotionPrimitive::DisableTorque => "DI".to_string(),
            MotionPrimitive::Raw(text) => text.clone(),
            // continuous-send: moves start on their own
            MotionPrimitive::Go
            | MotionPrimitive::GetInfo
            | MotionPrimitive::SetHighLimit(_)
            | MotionPrimitive::SetLowLimit(_) => return Ok(Vec::new()),
        };
        Ok(vec![Self::frame(axis, &body)])
    }

    fn frame_raw(&self, axis: usize, command: &str) -> Result<Frame, FormatError> {
        Ok(Self::frame(axis, command))
    }

    fn max_message_size(&self) -> usize {
        self.state.lock().max_message_size
    }

    fn dispatch(
        &self,
        channel: &mut dyn TransportChannel,
        _axis: usize,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        channel.write_all(frame, timeout)?;

        let text = String::from_utf8_lossy(frame).trim_end().to_string();
        let mut state = self.state.lock();
        Self::apply(&mut state, &text);
        state.commands.push(text);
        Ok(())
    }
}

impl StatusQuery for ScriptedDriver {
    fn identify(
        &self,
        _channel: &mut dyn TransportChannel,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        self.state
            .lock()
            .ident
            .clone()
            .ok_or(TransportError::Timeout(timeout))
    }

    fn query_status(
        &self,
        _channel: &mut dyn TransportChannel,
        axis: usize,
        sample: &mut AxisSample,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let native_done = state.native_done;
        let latch = state.latch_fault_on_limit;

        match state.script.get_mut(axis).and_then(VecDeque::pop_front) {
            Some(Step::Fail) => return Err(TransportError::Timeout(timeout)),
            Some(Step::Sample(scripted)) => {
                *sample = scripted;
                return Ok(());
            }
            None => {}
        }

        let sim = state
            .axes
            .get_mut(axis)
            .ok_or_else(|| TransportError::Protocol(format!("No axis {axis}")))?;
        let was_on_limit = sim.plus_limit || sim.minus_limit;
        sim.advance();
        if latch && !was_on_limit && (sim.plus_limit || sim.minus_limit) {
            sim.fault = true;
        }

        sample.position = sim.position;
        sample.encoder_position = Some(sim.position);
        sample.plus_limit = sim.plus_limit;
        sample.minus_limit = sim.minus_limit;
        sample.at_home = sim.position == 0;
        sample.homed = sim.homed;
        sample.power_on = sim.powered;
        sample.fault = sim.fault;
        if native_done {
            sample.native_done = Some(!sim.is_moving());
        }
        sample.velocity = Some(sim.last_step);
        Ok(())
    }

    fn query_position(
        &self,
        _channel: &mut dyn TransportChannel,
        _axis: usize,
        _sample: &mut AxisSample,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    fn recovery_sequence(&self, _axis: usize, position: i32) -> Vec<MotionPrimitive> {
        self.state
            .lock()
            .recovery
            .map(|recovery| recovery(position))
            .unwrap_or_default()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            velocity_done: self.state.lock().velocity_done,
            gain_support: true,
        }
    }
}
