use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Absolute gain change applied per ramp step.
pub const DEFAULT_RAMP_STEP: f32 = 0.05;

/// Interval between ramp steps.
pub const DEFAULT_RAMP_INTERVAL: Duration = Duration::from_millis(50);

/// Independent gain settings for the two output paths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VolumeSettings {
    /// Background stream gain, 0.0–1.0.
    pub music: f32,
    /// Ad voice gain, 0.0–1.0.
    pub ads: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        VolumeSettings {
            music: 0.5,
            ads: 1.0,
        }
    }
}

impl VolumeSettings {
    /// Both gains clamped to [0.0, 1.0].
    pub fn clamped(self) -> Self {
        VolumeSettings {
            music: self.music.clamp(0.0, 1.0),
            ads: self.ads.clamp(0.0, 1.0),
        }
    }
}

/// A stepped gain interpolation toward a target level.
///
/// Driven by `tick` from the owning loop; never sleeps. Each call advances
/// at most one step, so a ramp from 1.0 to 0.0 with the default step takes
/// 20 steps (~one second at the default interval). The last step lands
/// exactly on the target.
#[derive(Debug, Clone)]
pub struct VolumeRamp {
    current: f32,
    target: f32,
    step: f32,
    interval: Duration,
    next_step: Instant,
}

impl VolumeRamp {
    pub fn new(from: f32, to: f32, step: f32, interval: Duration, now: Instant) -> Self {
        VolumeRamp {
            current: from.clamp(0.0, 1.0),
            target: to.clamp(0.0, 1.0),
            step: step.max(f32::EPSILON),
            interval,
            next_step: now + interval,
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_done(&self) -> bool {
        self.current == self.target
    }

    /// Advance the ramp. Returns the new gain when a step fires.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        if self.is_done() || now < self.next_step {
            return None;
        }
        self.next_step = now + self.interval;
        let remaining = self.target - self.current;
        if remaining.abs() <= self.step {
            self.current = self.target;
        } else if remaining > 0.0 {
            self.current += self.step;
        } else {
            self.current -= self.step;
        }
        Some(self.current)
    }
}
