//! Step scheduling: how often and how many generations to run.

use bevy::log::info;
use bevy::prelude::Resource;
use std::time::Duration;

use crate::error::WireworldResult;
use crate::simulation::Simulation;

const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MAX_INTERVAL: Duration = Duration::from_secs(1);
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// What `slower()` does once the interval would pass one second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalOverflow {
    /// Stay at one second
    #[default]
    Clamp,
    /// Start over at one millisecond
    Wrap,
}

/// Fires `multiplier` steps every `interval`.
#[derive(Resource, Debug, Clone)]
pub struct ClockController {
    interval: Duration,
    multiplier: u32,
    overflow: IntervalOverflow,
    last_fire: Option<Duration>,
}

impl Default for ClockController {
    fn default() -> Self {
        Self::new(IntervalOverflow::default())
    }
}

impl ClockController {
    pub fn new(overflow: IntervalOverflow) -> Self {
        Self {
            interval: Duration::from_millis(10),
            multiplier: 1,
            overflow,
            last_fire: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Steps due at `now`. The first tick always fires.
    pub fn tick(&mut self, now: Duration) -> u32 {
        let due = match self.last_fire {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.interval,
        };
        if !due {
            return 0;
        }
        self.last_fire = Some(now);
        self.multiplier
    }

    /// Tick and run whatever is due. Returns the number of steps executed.
    pub fn drive(&mut self, now: Duration, simulation: &mut Simulation) -> WireworldResult<u32> {
        let steps = self.tick(now);
        if steps > 0 {
            simulation.step(i64::from(steps))?;
        }
        Ok(steps)
    }

    /// Shorten the interval; at the floor, run more steps per tick instead.
    pub fn faster(&mut self) {
        if self.interval <= MIN_INTERVAL {
            self.multiplier = self.multiplier.saturating_mul(10);
        } else {
            self.interval = (self.interval / 10).max(MIN_INTERVAL);
        }
        self.log_speed();
    }

    /// Inverse of [`faster`](Self::faster).
    pub fn slower(&mut self) {
        if self.multiplier > 1 {
            self.multiplier = (self.multiplier / 10).max(1);
        } else {
            self.interval *= 10;
            if self.interval > MAX_INTERVAL {
                self.interval = match self.overflow {
                    IntervalOverflow::Clamp => MAX_INTERVAL,
                    IntervalOverflow::Wrap => MIN_INTERVAL,
                };
            }
        }
        self.log_speed();
    }

    /// Requested steps per second.
    pub fn target_hz(&self) -> f64 {
        f64::from(self.multiplier) / self.interval.as_secs_f64()
    }

    fn log_speed(&self) {
        info!(
            "Clock: {} step(s) every {:?} (target {})",
            self.multiplier,
            self.interval,
            format_frequency(self.target_hz())
        );
    }
}

/// Measured steps per second over one-second windows.
#[derive(Resource, Debug, Clone, Default)]
pub struct FrequencyMeter {
    window_start: Option<Duration>,
    steps: u64,
    rate: f64,
}

impl FrequencyMeter {
    /// Count `steps` executed at `now`. Closes the window once a second has passed.
    pub fn record(&mut self, now: Duration, steps: u32) {
        let start = *self.window_start.get_or_insert(now);
        self.steps += u64::from(steps);

        let elapsed = now.saturating_sub(start);
        if elapsed >= RATE_WINDOW {
            self.rate = self.steps as f64 / elapsed.as_secs_f64();
            self.steps = 0;
            self.window_start = Some(now);
        }
    }

    /// Rate of the last completed window.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Human readable frequency: `"950 Hz"`, `"1.50 kHz"`, `"2.00 MHz"`, `"1.00 GHz"`.
pub fn format_frequency(hz: f64) -> String {
    if hz < 1e3 {
        format!("{hz:.0} Hz")
    } else if hz < 1e6 {
        format!("{:.2} kHz", hz / 1e3)
    } else if hz < 1e9 {
        format!("{:.2} MHz", hz / 1e6)
    } else {
        format!("{:.2} GHz", hz / 1e9)
    }
}
