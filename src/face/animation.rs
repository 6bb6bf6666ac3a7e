//! Time-driven face state: emotion transition, gaze, lean, blink, wink, dizzy.
//!
//! The animator knows nothing about the display. It is advanced by an explicit
//! `dt` so the render thread and tests drive it the same way.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::emotion::{interpolate, Emotion, EmotionParams};
use super::layout::{FaceGeometry, FacePose};

/// Animation rates. Speeds are per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceTiming {
    pub transition_speed: f32,
    pub gaze_follow_speed: f32,
    pub face_shift_speed: f32,
    pub blink_speed: f32,
    pub blink_min_ms: u32,
    pub blink_max_ms: u32,
    /// How long a poked eye stays shut before reopening.
    pub wink_hold_s: f32,
    pub wink_release_speed: f32,
    pub dizzy_wobble_hz: f32,
    pub dizzy_wobble_amp: f32,
}

impl Default for FaceTiming {
    fn default() -> Self {
        Self {
            transition_speed: 2.5,
            gaze_follow_speed: 8.0,
            face_shift_speed: 5.0,
            blink_speed: 10.0,
            blink_min_ms: 2000,
            blink_max_ms: 5000,
            wink_hold_s: 0.25,
            wink_release_speed: 4.0,
            dizzy_wobble_hz: 1.5,
            dizzy_wobble_amp: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Blink {
    blinking: bool,
    phase: f32,
    next_at_ms: f64,
}

impl Blink {
    /// Closing over the first 30 % of the phase, opening over the rest.
    fn closure(&self) -> f32 {
        if !self.blinking {
            0.0
        } else if self.phase < 0.3 {
            self.phase / 0.3
        } else {
            (1.0 - (self.phase - 0.3) / 0.7).max(0.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Wink {
    amount: f32,
    hold: f32,
}

pub struct Animator {
    timing: FaceTiming,
    target: Emotion,
    from: EmotionParams,
    params: EmotionParams,
    tau: f32,
    gaze: (f32, f32),
    gaze_target: (f32, f32),
    offset: (f32, f32),
    blink: Blink,
    winks: [Wink; 2],
    /// Emotion to restore when dizzy ends.
    dizzy_restore: Option<Emotion>,
    clock_ms: f64,
    rng: StdRng,
}

impl Animator {
    pub fn new(initial: Emotion, timing: FaceTiming, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut anim = Self {
            timing,
            target: initial,
            from: initial.params(),
            params: initial.params(),
            tau: 1.0,
            gaze: (0.5, 0.5),
            gaze_target: (0.5, 0.5),
            offset: (0.0, 0.0),
            blink: Blink::default(),
            winks: [Wink::default(); 2],
            dizzy_restore: None,
            clock_ms: 0.0,
            rng,
        };
        anim.schedule_blink();
        anim
    }

    // --- Emotion ---

    /// Start a transition toward `emotion` from wherever the face is now.
    ///
    /// Setting the emotion already targeted is a no-op, so repeated commands
    /// neither restart nor stall a transition.
    pub fn set_emotion(&mut self, emotion: Emotion) {
        self.dizzy_restore = None;
        self.retarget(emotion);
    }

    fn retarget(&mut self, emotion: Emotion) {
        if emotion == self.target {
            return;
        }
        self.from = self.params;
        self.target = emotion;
        self.tau = 0.0;
    }

    pub fn emotion(&self) -> Emotion {
        self.target
    }

    pub fn params(&self) -> &EmotionParams {
        &self.params
    }

    pub fn in_transition(&self) -> bool {
        self.tau < 1.0
    }

    pub fn set_dizzy(&mut self, on: bool) {
        match (on, self.dizzy_restore) {
            (true, None) => {
                let previous = self.target;
                self.retarget(Emotion::Dizzy);
                self.dizzy_restore = Some(previous);
            }
            (false, Some(previous)) => {
                self.dizzy_restore = None;
                self.retarget(previous);
            }
            _ => {}
        }
    }

    pub fn is_dizzy(&self) -> bool {
        self.dizzy_restore.is_some()
    }

    // --- Gaze ---

    /// Store a new gaze target. Coordinates are clamped to [0,1]; non-finite
    /// values are treated as center.
    pub fn set_gaze_target(&mut self, x: f32, y: f32) {
        let sanitize = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 };
        self.gaze_target = (sanitize(x), sanitize(y));
    }

    pub fn gaze_target(&self) -> (f32, f32) {
        self.gaze_target
    }

    pub fn gaze(&self) -> (f32, f32) {
        self.gaze
    }

    /// Lean, normalized to [-1,1] per axis.
    pub fn offset(&self) -> (f32, f32) {
        self.offset
    }

    // --- Blink / wink ---

    pub fn force_blink(&mut self) {
        self.blink.phase = 0.0;
        self.blink.blinking = true;
    }

    pub fn is_blinking(&self) -> bool {
        self.blink.blinking
    }

    pub fn poke(&mut self, eye: Eye) {
        self.winks[eye.index()] = Wink {
            amount: 1.0,
            hold: self.timing.wink_hold_s,
        };
    }

    fn schedule_blink(&mut self) {
        let (lo, hi) = (self.timing.blink_min_ms, self.timing.blink_max_ms.max(self.timing.blink_min_ms));
        let delay = self.rng.gen_range(lo..=hi);
        self.blink.next_at_ms = self.clock_ms + delay as f64;
    }

    // --- Stepping ---

    pub fn advance(&mut self, dt: f32, geom: &FaceGeometry) {
        let dt = dt.max(0.0);
        self.clock_ms += dt as f64 * 1000.0;

        if self.tau < 1.0 {
            self.tau = (self.tau + dt * self.timing.transition_speed).min(1.0);
            let to = self.target.params();
            self.params = if self.tau >= 1.0 {
                to
            } else {
                interpolate(&self.from, &to, self.tau)
            };
        }

        let k = (dt * self.timing.gaze_follow_speed).min(1.0);
        self.gaze.0 += (self.gaze_target.0 - self.gaze.0) * k;
        self.gaze.1 += (self.gaze_target.1 - self.gaze.1) * k;

        let th = geom.edge_threshold;
        let want = (edge_lean(self.gaze.0, th), edge_lean(self.gaze.1, th));
        let k = (dt * self.timing.face_shift_speed).min(1.0);
        self.offset.0 += (want.0 - self.offset.0) * k;
        self.offset.1 += (want.1 - self.offset.1) * k;

        if !self.blink.blinking && self.clock_ms >= self.blink.next_at_ms {
            self.blink.blinking = true;
            self.blink.phase = 0.0;
        }
        if self.blink.blinking {
            self.blink.phase += dt * self.timing.blink_speed;
            if self.blink.phase >= 1.0 {
                self.blink.blinking = false;
                self.blink.phase = 0.0;
                self.schedule_blink();
            }
        }

        for wink in &mut self.winks {
            if wink.hold > 0.0 {
                wink.hold -= dt;
            } else if wink.amount > 0.0 {
                wink.amount = (wink.amount - dt * self.timing.wink_release_speed).max(0.0);
            }
        }
    }

    /// Snapshot for layout. Dizziness wobbles the drawn gaze around the
    /// stored one without touching the target.
    pub fn pose(&self) -> FacePose {
        let mut gaze = self.gaze;
        if self.is_dizzy() {
            let t = (self.clock_ms / 1000.0) as f32;
            let w = std::f32::consts::TAU * self.timing.dizzy_wobble_hz * t;
            let amp = self.timing.dizzy_wobble_amp;
            gaze.0 = (gaze.0 + amp * w.sin()).clamp(0.0, 1.0);
            gaze.1 = (gaze.1 + amp * w.cos()).clamp(0.0, 1.0);
        }
        let blink = self.blink.closure();
        FacePose {
            params: self.params,
            gaze,
            offset: self.offset,
            closure: [
                blink.max(self.winks[0].amount),
                blink.max(self.winks[1].amount),
            ],
        }
    }
}

/// Lean toward an edge once gaze passes the threshold, reaching ±1 at the
/// extremes.
fn edge_lean(g: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 0.0;
    }
    if g < threshold {
        -(threshold - g) / threshold
    } else if g > 1.0 - threshold {
        (g - (1.0 - threshold)) / threshold
    } else {
        0.0
    }
}
