use std::time::Duration;

use crate::spec::Timing;

/// Restart delay bookkeeping for one supervisor.
///
/// A run shorter than `fast_fail` is answered with the current delay, which
/// then doubles up to `ceiling`. A run that lasted at least `fast_fail` is
/// considered stable: the delay drops back to `floor` and the restart is
/// immediate.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    floor: Duration,
    ceiling: Duration,
    fast_fail: Duration,
}

impl Backoff {
    pub fn new(timing: &Timing) -> Self {
        let floor = timing.backoff_floor.min(timing.backoff_ceiling);
        Self {
            current: floor,
            floor,
            ceiling: timing.backoff_ceiling,
            fast_fail: timing.fast_fail,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns how long to wait before the next spawn, given the uptime of
    /// the run that just ended. `None` means restart right away.
    pub fn after_run(&mut self, uptime: Duration) -> Option<Duration> {
        if uptime >= self.fast_fail {
            self.current = self.floor;
            return None;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        Some(delay)
    }
}
