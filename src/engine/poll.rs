//! Poll scheduling shared by the job poller and the instance watcher.
//!
//! The schedule is a plain state object; callers drive it with whatever clock
//! they have. In the engine that is `tokio::time::Instant`, which tests pause.

use crate::error::FailureReason;
use crate::model::Warnings;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one poll loop: the warnings gathered along the way and either the
/// final observed value or the reason the phase failed.
#[derive(Debug, Clone)]
pub(crate) struct Polled<T> {
    pub warnings: Warnings,
    pub outcome: Result<T, FailureReason>,
}

impl<T> Polled<T> {
    pub fn ok(warnings: Warnings, value: T) -> Self {
        Self {
            warnings,
            outcome: Ok(value),
        }
    }

    pub fn failed(warnings: Warnings, reason: FailureReason) -> Self {
        Self {
            warnings,
            outcome: Err(reason),
        }
    }
}

/// What the driver loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStep {
    Poll,
    Wait(Duration),
    Expired,
}

#[derive(Debug, Clone)]
pub(crate) struct PollSchedule {
    interval: Duration,
    deadline: Instant,
    last_check: Option<Instant>,
    checks: u32,
}

impl PollSchedule {
    pub fn new(start: Instant, interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            deadline: start + timeout,
            last_check: None,
            checks: 0,
        }
    }

    /// The deadline is exclusive: nothing is polled at or after it.
    pub fn step(&self, now: Instant) -> PollStep {
        if now >= self.deadline {
            return PollStep::Expired;
        }
        match self.last_check {
            None => PollStep::Poll,
            Some(last) => {
                let due = last + self.interval;
                if now >= due {
                    PollStep::Poll
                } else {
                    PollStep::Wait(due.min(self.deadline) - now)
                }
            }
        }
    }

    pub fn record_check(&mut self, now: Instant) {
        self.last_check = Some(now);
        self.checks += 1;
    }

    pub fn checks(&self) -> u32 {
        self.checks
    }
}

/// Drive the schedule until the next poll is due. Returns `false` once expired.
pub(crate) async fn next_poll(schedule: &mut PollSchedule) -> bool {
    loop {
        let now = Instant::now();
        match schedule.step(now) {
            PollStep::Poll => {
                schedule.record_check(now);
                return true;
            }
            PollStep::Wait(d) => tokio::time::sleep(d).await,
            PollStep::Expired => return false,
        }
    }
}
