use crate::status::StatusFlags;

/// Communication health of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommHealth {
    #[default]
    Normal,
    Retry,
    CommErr,
}

/// What the poller does with the sample round that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Round succeeded, update the axis.
    Update,
    /// First failure after a healthy round, skip the update silently.
    Soft,
    /// Repeated failure, surface the fault.
    Hard,
}

impl CommHealth {
    pub fn record(&mut self, ok: bool) -> Outcome {
        if ok {
            *self = CommHealth::Normal;
            return Outcome::Update;
        }

        match self {
            CommHealth::Normal => {
                *self = CommHealth::Retry;
                Outcome::Soft
            }
            CommHealth::Retry | CommHealth::CommErr => {
                *self = CommHealth::CommErr;
                Outcome::Hard
            }
        }
    }

    /// Mirrors an outcome onto the status bits it owns.
    pub fn apply(outcome: Outcome, flags: &mut StatusFlags) {
        match outcome {
            Outcome::Update => flags.comm_error = false,
            Outcome::Soft => {}
            Outcome::Hard => {
                flags.comm_error = true;
                flags.problem = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_failures_escalate_and_one_success_heals() {
        let mut health = CommHealth::default();
        let mut flags = StatusFlags::default();

        let outcome = health.record(false);
        CommHealth::apply(outcome, &mut flags);
        assert_eq!((health, outcome), (CommHealth::Retry, Outcome::Soft));
        assert!(!flags.problem && !flags.comm_error);

        let outcome = health.record(false);
        CommHealth::apply(outcome, &mut flags);
        assert_eq!((health, outcome), (CommHealth::CommErr, Outcome::Hard));
        assert!(flags.problem && flags.comm_error);

        assert_eq!(health.record(false), Outcome::Hard);

        let outcome = health.record(true);
        CommHealth::apply(outcome, &mut flags);
        assert_eq!((health, outcome), (CommHealth::Normal, Outcome::Update));
        assert!(!flags.comm_error);
    }

    #[test]
    fn never_jumps_from_normal_to_comm_err() {
        // every outcome sequence up to 10 rounds
        for bits in 0u32..(1 << 10) {
            let mut health = CommHealth::Normal;
            for round in 0..10 {
                let before = health;
                health.record(bits & (1 << round) != 0);
                assert!(
                    !(before == CommHealth::Normal && health == CommHealth::CommErr),
                    "sequence {bits:#b} jumped at round {round}"
                );
            }
        }
    }
}
