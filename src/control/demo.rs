//! Local demo cycle shown while the server is unreachable.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::face::{AnimationKind, Emotion};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    /// Disconnected this long before the demo starts.
    pub grace_ms: u64,
    /// Time each step stays on screen.
    pub step_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_ms: 10_000,
            step_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoStep {
    Emotion(Emotion),
    Clock,
    Animation(AnimationKind),
}

const STEPS: [DemoStep; 11] = [
    DemoStep::Emotion(Emotion::Neutral),
    DemoStep::Emotion(Emotion::Happy),
    DemoStep::Emotion(Emotion::Sad),
    DemoStep::Emotion(Emotion::Angry),
    DemoStep::Emotion(Emotion::Surprised),
    DemoStep::Emotion(Emotion::Thinking),
    DemoStep::Emotion(Emotion::Confused),
    DemoStep::Emotion(Emotion::Excited),
    DemoStep::Emotion(Emotion::Cat),
    DemoStep::Clock,
    DemoStep::Animation(AnimationKind::Rain),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Off,
    Armed { since: Instant },
    Running { index: usize, next_at: Instant },
}

#[derive(Debug)]
pub struct DemoCycle {
    config: DemoConfig,
    phase: Phase,
}

impl DemoCycle {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            phase: Phase::Off,
        }
    }

    /// Start the grace period. Already armed or running stays as is.
    pub fn arm(&mut self, now: Instant) {
        if self.config.enabled && self.phase == Phase::Off {
            self.phase = Phase::Armed { since: now };
        }
    }

    /// Skip the grace period.
    pub fn start_now(&mut self, now: Instant) {
        if self.config.enabled && !self.is_running() {
            self.phase = Phase::Armed {
                since: now.checked_sub(self.grace()).unwrap_or(now),
            };
        }
    }

    /// Returns whether the demo was on screen.
    pub fn stop(&mut self) -> bool {
        let was_running = self.is_running();
        self.phase = Phase::Off;
        was_running
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    pub fn is_armed(&self) -> bool {
        !matches!(self.phase, Phase::Off)
    }

    /// When `poll` next has something to do.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Off => None,
            Phase::Armed { since } => Some(since + self.grace()),
            Phase::Running { next_at, .. } => Some(next_at),
        }
    }

    /// Step to show now, if one is due.
    pub fn poll(&mut self, now: Instant) -> Option<DemoStep> {
        let step = Duration::from_millis(self.config.step_ms.max(1));
        match self.phase {
            Phase::Off => None,
            Phase::Armed { since } if now >= since + self.grace() => {
                self.phase = Phase::Running {
                    index: 0,
                    next_at: now + step,
                };
                Some(STEPS[0])
            }
            Phase::Armed { .. } => None,
            Phase::Running { index, next_at } if now >= next_at => {
                let index = (index + 1) % STEPS.len();
                self.phase = Phase::Running {
                    index,
                    next_at: now + step,
                };
                Some(STEPS[index])
            }
            Phase::Running { .. } => None,
        }
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.grace_ms)
    }
}
