//! Done/motion inference from periodic samples.
//!
//! Controllers differ in what they report: some expose a done bit, some only
//! a position, some a velocity readback. [`update`] folds one sample into the
//! axis status using the best signal available.

use crate::{
    config::AxisConfig,
    limits::limit_active,
    status::{AxisSample, AxisStatus, Direction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tuning {
    pub no_motion_threshold: u32,
    pub motion_timeout_cycles: Option<u32>,
    pub encoder_present: bool,
    /// Done comes from a zero velocity readback rather than a stop bit.
    pub velocity_done: bool,
}

impl Tuning {
    pub fn new(config: &AxisConfig, velocity_done: bool) -> Self {
        Self {
            no_motion_threshold: config.no_motion_threshold,
            motion_timeout_cycles: config.motion_timeout_cycles,
            encoder_present: config.encoder_present,
            velocity_done,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    pub ls_active: bool,
    /// The cycle carries news worth publishing to watchers.
    pub retry_worthy: bool,
    /// The pending motion stalled past its timeout and must be stopped.
    pub timed_out: bool,
}

/// `attached` is set when a motion was handed to the axis this cycle.
pub fn update(
    status: &mut AxisStatus,
    sample: &AxisSample,
    attached: bool,
    tuning: &Tuning,
) -> Verdict {
    if sample.position == status.position {
        status.no_motion_count = status.no_motion_count.saturating_add(1);
    } else {
        status.flags.direction = Direction::from_delta(sample.position, status.position);
        status.position = sample.position;
        status.no_motion_count = 0;
    }

    let flags = &mut status.flags;
    flags.plus_limit = sample.plus_limit;
    flags.minus_limit = sample.minus_limit;
    flags.at_home = sample.at_home;
    flags.homed = sample.homed;
    flags.power_on = sample.power_on;
    flags.problem = sample.fault;

    status.encoder_position = if tuning.encoder_present {
        sample.encoder_position.unwrap_or(sample.position)
    } else {
        0
    };

    let mut done = match sample.native_done {
        Some(native) => native,
        None => status.no_motion_count > tuning.no_motion_threshold,
    };

    let velocity_mode = status
        .pending_motion
        .as_ref()
        .is_some_and(|motion| motion.is_velocity_mode());
    if let Some(velocity) = sample.velocity {
        if tuning.velocity_done || velocity_mode {
            done = velocity == 0;
        }
    }
    status.velocity = status.flags.direction.signed(sample.velocity.unwrap_or(0));

    // the first sample after a command may predate it, whatever the done source
    if attached {
        done = false;
    }

    let mut timed_out = false;
    if let Some(limit) = tuning.motion_timeout_cycles {
        if status.pending_motion.is_some() && status.no_motion_count > limit {
            status.flags.problem = true;
            status.no_motion_count = 0;
            timed_out = true;
        }
    }

    status.flags.done = done;
    status.flags.moving = !done;

    let ls_active = limit_active(&status.flags);
    Verdict {
        ls_active,
        retry_worthy: status.no_motion_count == 0 || ls_active || done || status.flags.problem,
        timed_out,
    }
}
