//! Wall-clock timing used for frame statistics.

use std::time::{Duration, Instant};

/// Measures elapsed wall-clock time for a frame or a section of one.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Start a timer at the current instant.
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Time since the timer was started or last restarted.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since start, in milliseconds.
    pub fn elapsed_ms(&self) -> f32 {
        self.elapsed().as_secs_f32() * 1000.0
    }

    /// Time since the previous tick (or start), then begin a new interval.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Restart both the total and the tick interval.
    pub fn restart(&mut self) {
        *self = Self::start();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
