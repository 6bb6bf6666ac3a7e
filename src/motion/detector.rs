//! Shake detection from accelerometer magnitude.
//!
//! Counts direction changes of the magnitude while it is above threshold.
//! Enough changes inside the window make one shake; the cooldown that follows
//! suppresses further shakes while the intensity decays.

use super::MotionConfig;

/// Share of the threshold a magnitude step must exceed to count as movement.
const DELTA_FRACTION: f32 = 0.3;
const COOLDOWN_DECAY: f32 = 0.95;
const QUIET_DECAY: f32 = 0.9;
const QUIET_DECAY_AFTER_MS: u64 = 500;
const INTENSITY_FLOOR: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct ShakeDetector {
    config: MotionConfig,
    last_magnitude: f32,
    rising: bool,
    direction_changes: u32,
    window_start_ms: u64,
    last_peak_ms: u64,
    last_shake_ms: Option<u64>,
    shaking: bool,
    intensity: f32,
}

impl ShakeDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            last_magnitude: 0.0,
            rising: false,
            direction_changes: 0,
            window_start_ms: 0,
            last_peak_ms: 0,
            last_shake_ms: None,
            shaking: false,
            intensity: 0.0,
        }
    }

    pub fn is_shaking(&self) -> bool {
        self.shaking
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Feed one sample (m/s²) taken at `now_ms`. Returns the intensity when
    /// this sample completes a new shake.
    pub fn process(&mut self, accel: [f32; 3], now_ms: u64) -> Option<f32> {
        let [ax, ay, az] = accel;
        let magnitude = (ax * ax + ay * ay + az * az).sqrt();
        let delta = magnitude - self.last_magnitude;
        let threshold = self.config.threshold;

        if self.in_cooldown(now_ms) {
            self.last_magnitude = magnitude;
            if self.shaking {
                self.decay(COOLDOWN_DECAY);
            }
            return None;
        }

        let mut fired = None;
        let rising = delta > 0.0;
        if delta.abs() > threshold * DELTA_FRACTION && rising != self.rising {
            if magnitude > threshold {
                fired = self.count_change(magnitude, now_ms);
            }
            self.rising = rising;
        }

        if now_ms.saturating_sub(self.last_peak_ms) > self.config.window_ms * 2 {
            self.direction_changes = 0;
        }

        if self.shaking
            && fired.is_none()
            && self
                .last_shake_ms
                .is_some_and(|t| now_ms.saturating_sub(t) > QUIET_DECAY_AFTER_MS)
        {
            self.decay(QUIET_DECAY);
        }

        self.last_magnitude = magnitude;
        fired
    }

    fn in_cooldown(&self, now_ms: u64) -> bool {
        self.last_shake_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < self.config.cooldown_ms)
    }

    fn count_change(&mut self, magnitude: f32, now_ms: u64) -> Option<f32> {
        if self.direction_changes == 0 {
            self.window_start_ms = now_ms;
        }
        if now_ms.saturating_sub(self.window_start_ms) >= self.config.window_ms {
            self.direction_changes = 1;
            self.window_start_ms = now_ms;
            return None;
        }

        self.direction_changes += 1;
        self.last_peak_ms = now_ms;
        if self.direction_changes < self.config.count_trigger {
            return None;
        }
        self.direction_changes = 0;
        if self.shaking {
            return None;
        }
        self.shaking = true;
        self.last_shake_ms = Some(now_ms);
        self.intensity = (magnitude / threshold_span(self.config.threshold)).clamp(0.0, 1.0);
        Some(self.intensity)
    }

    fn decay(&mut self, factor: f32) {
        self.intensity *= factor;
        if self.intensity < INTENSITY_FLOOR {
            self.shaking = false;
            self.intensity = 0.0;
        }
    }
}

/// Magnitude that maps to full intensity.
fn threshold_span(threshold: f32) -> f32 {
    threshold * 3.0
}
