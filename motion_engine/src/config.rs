use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIN_UPDATE_DELAY_MS: u64 = 30;
const MAX_UPDATE_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    pub encoder_present: bool,
    /// Sent ahead of the first motion-class primitive of a transaction.
    pub pre_motion: Option<String>,
    /// Sent once the motion it was attached to completes.
    pub post_motion: Option<String>,
    pub no_motion_threshold: u32,
    /// Stop and flag a problem after this many stalled samples of a pending
    /// motion.
    pub motion_timeout_cycles: Option<u32>,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            encoder_present: false,
            pre_motion: None,
            post_motion: None,
            no_motion_threshold: 1,
            motion_timeout_cycles: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub moving_period_ms: u64,
    pub idle_period_ms: u64,
    /// Settling time after a motion command before the axis is sampled.
    /// Zero disables it, anything else is clamped to 30..=100 ms.
    pub update_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            moving_period_ms: 100,
            idle_period_ms: 1000,
            update_delay_ms: 50,
            timeout_ms: 1000,
        }
    }
}

impl PollerConfig {
    pub fn periods(&self) -> PollPeriods {
        PollPeriods {
            moving: Duration::from_millis(self.moving_period_ms),
            idle: Duration::from_millis(self.idle_period_ms),
        }
    }

    pub fn update_delay(&self) -> Duration {
        if self.update_delay_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(
            self.update_delay_ms
                .clamp(MIN_UPDATE_DELAY_MS, MAX_UPDATE_DELAY_MS),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Everything the engine needs to run one card.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardConfig {
    pub name: String,
    pub poller: PollerConfig,
    pub axes: Vec<AxisConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPeriods {
    pub moving: Duration,
    pub idle: Duration,
}

impl PollPeriods {
    pub fn select(&self, active: bool) -> Duration {
        if active { self.moving } else { self.idle }
    }
}
