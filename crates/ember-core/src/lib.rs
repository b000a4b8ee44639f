// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

use std::time::{Duration, Instant};
use tracing::info;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Result of one [`FrameClock::tick`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTick {
    /// Seconds since the previous tick.
    pub dt: f32,
    /// Set once per report interval.
    pub fps: Option<u32>,
}

/// Measures frame delta time and counts frames for a periodic FPS line.
pub struct FrameClock {
    last: Instant,
    window_start: Instant,
    frames: u32,
    interval: Duration,
}

impl FrameClock {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            last: now,
            window_start: now,
            frames: 0,
            interval,
        }
    }

    /// Advances the clock and logs the frame rate when a report is due.
    pub fn tick(&mut self) -> f32 {
        let tick = self.tick_at(Instant::now());
        if let Some(fps) = tick.fps {
            info!("fps ~ {}", fps);
        }
        tick.dt
    }

    pub fn tick_at(&mut self, now: Instant) -> FrameTick {
        let dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        let fps = if elapsed >= self.interval {
            let rate = (self.frames as f64 / elapsed.as_secs_f64()).round() as u32;
            self.frames = 0;
            self.window_start = now;
            Some(rate)
        } else {
            None
        };
        FrameTick { dt, fps }
    }

    /// Forgets time spent while paused so the next delta stays small.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.last = now;
        self.window_start = now;
        self.frames = 0;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
