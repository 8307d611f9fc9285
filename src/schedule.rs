//! When to run detection.
//!
//! `Scheduler` is a pure decision function over the current hour; `Interval`
//! paces the checks and `Shutdown` lets them end early.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::Timelike;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Fire once per configured hour of day.
    Scheduled,
    /// Fire once at startup, then finish.
    Immediate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Fire,
    Wait,
    Done,
}

#[derive(Clone, Debug)]
pub struct Scheduler {
    mode: ScheduleMode,
    hours: BTreeSet<u32>,
    last_hour: Option<u32>,
    fired: bool,
}

impl Scheduler {
    pub fn scheduled(hours: impl IntoIterator<Item = u32>) -> Self {
        Self {
            mode: ScheduleMode::Scheduled,
            hours: hours.into_iter().filter(|h| *h < 24).collect(),
            last_hour: None,
            fired: false,
        }
    }

    pub fn immediate() -> Self {
        Self {
            mode: ScheduleMode::Immediate,
            hours: BTreeSet::new(),
            last_hour: None,
            fired: false,
        }
    }

    pub fn hours(&self) -> impl Iterator<Item = u32> + '_ {
        self.hours.iter().copied()
    }

    /// Decide for a check made during `hour` (0-23).
    ///
    /// Scheduled mode fires on the first check inside a configured hour; later
    /// checks in the same hour wait. An hour with no check is skipped.
    pub fn poll(&mut self, hour: u32) -> Trigger {
        match self.mode {
            ScheduleMode::Immediate => {
                if self.fired {
                    Trigger::Done
                } else {
                    self.fired = true;
                    Trigger::Fire
                }
            }
            ScheduleMode::Scheduled => {
                let entered = self.last_hour != Some(hour);
                self.last_hour = Some(hour);
                if entered && self.hours.contains(&hour) {
                    self.fired = true;
                    Trigger::Fire
                } else {
                    Trigger::Wait
                }
            }
        }
    }

    /// True once an immediate scheduler has fired.
    pub fn is_done(&self) -> bool {
        self.mode == ScheduleMode::Immediate && self.fired
    }
}

/// Source of the current hour of day.
pub trait Clock: Send + Sync {
    fn hour(&self) -> u32;
}

/// Local wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

/// Process-wide stop request, shared across threads.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        if let Ok(mut stopped) = flag.lock() {
            *stopped = true;
        }
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.0.lock().map(|stopped| *stopped).unwrap_or(true)
    }

    /// Sleep up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let Ok(guard) = flag.lock() else {
            return true;
        };
        match cvar.wait_timeout_while(guard, timeout, |stopped| !*stopped) {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }
}

/// Fixed-period ticker. The first tick is immediate; a late tick does not
/// queue extra ticks.
#[derive(Debug)]
pub struct Interval {
    period: Duration,
    next: Instant,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the next tick. Returns false if shutdown arrived first.
    pub fn tick(&mut self, shutdown: &Shutdown) -> bool {
        let now = Instant::now();
        if self.next > now && shutdown.wait_timeout(self.next - now) {
            return false;
        }
        if shutdown.is_triggered() {
            return false;
        }
        let now = Instant::now();
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }
}
