// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Start/stop clock that feeds `delta_time` into render packets.
///
/// A stopped clock reports zero for both elapsed and delta time.
#[derive(Debug, Default)]
pub struct FrameClock {
    start: Option<Instant>,
    last_tick: Option<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.start = Some(now);
        self.last_tick = Some(now);
    }

    pub fn stop(&mut self) {
        self.start = None;
        self.last_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Seconds since the previous tick (or since `start`).
    pub fn tick(&mut self) -> f32 {
        match self.last_tick {
            Some(last) => {
                let now = Instant::now();
                self.last_tick = Some(now);
                (now - last).as_secs_f32()
            }
            None => 0.0,
        }
    }
}
