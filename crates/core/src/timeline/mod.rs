use serde::{Deserialize, Serialize};

use crate::EffectCommand;

/// Absolute engine time and tick count.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    pub time_seconds: f64,
    pub ticks: u64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Counts one tick. Time only moves forward.
    pub fn advance(&mut self, delta: f64) {
        if delta > 0.0 {
            self.time_seconds += delta;
        }
        self.ticks += 1;
    }
}

/// Turns irregular wall-clock intervals into whole fixed-size ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedStep {
    step: f64,
    accumulator: f64,
    max_ticks_per_update: u32,
}

impl FixedStep {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            step: 1.0 / rate_hz,
            accumulator: 0.0,
            max_ticks_per_update: 8,
        }
    }

    /// Caps how many ticks one `accumulate` call may release; time beyond
    /// the cap is dropped so a stalled host does not cause a burst.
    pub fn with_max_ticks(mut self, max_ticks_per_update: u32) -> Self {
        self.max_ticks_per_update = max_ticks_per_update.max(1);
        self
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Adds elapsed wall-clock seconds and returns how many ticks are due.
    pub fn accumulate(&mut self, elapsed: f64) -> u32 {
        if elapsed.is_finite() && elapsed > 0.0 {
            self.accumulator += elapsed;
        }
        let due = (self.accumulator / self.step).floor();
        let ticks = due.min(self.max_ticks_per_update as f64) as u32;
        if due > ticks as f64 {
            tracing::debug!(dropped = due - ticks as f64, "fixed step falling behind");
            self.accumulator = 0.0;
        } else {
            self.accumulator -= ticks as f64 * self.step;
        }
        ticks
    }
}

/// A configuration command released once engine time reaches `time_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub time_seconds: f64,
    #[serde(flatten)]
    pub command: EffectCommand,
}

impl ScheduledEvent {
    pub fn new(time_seconds: f64, command: EffectCommand) -> Self {
        Self {
            time_seconds,
            command,
        }
    }
}

/// Releases scheduled commands between ticks, in time order.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    events: Vec<ScheduledEvent>,
    next_event: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_events(&mut self, events: Vec<ScheduledEvent>) {
        self.events = events;
        self.events
            .sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));
        self.next_event = 0;
    }

    pub fn pending(&self) -> usize {
        self.events.len() - self.next_event
    }

    /// Commands whose time is at or before `clock`.
    pub fn due(&mut self, clock: &PlaybackClock) -> Vec<EffectCommand> {
        let start = self.next_event;
        while let Some(event) = self.events.get(self.next_event) {
            if clock.time_seconds < event.time_seconds {
                break;
            }
            self.next_event += 1;
        }
        self.events[start..self.next_event]
            .iter()
            .map(|event| event.command.clone())
            .collect()
    }
}
