//! Atomic playback state machine.
//!
//! Shared between the playback thread, the control loop and the transport
//! handler via `Arc`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    /// No playback thread running.
    Idle = 0,
    /// Writing audio or silence every chunk period.
    Playing = 1,
    /// Thread alive but not touching the codec.
    Paused = 2,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug)]
pub struct PlaybackStateMachine {
    state: AtomicU8,
}

impl PlaybackStateMachine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        let ok = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            debug!(%from, %to, "Playback state");
        }
        ok
    }

    /// Idle -> Playing.
    pub fn start(&self) -> bool {
        self.transition(PlaybackState::Idle, PlaybackState::Playing)
    }

    /// Playing -> Paused.
    pub fn pause(&self) -> bool {
        self.transition(PlaybackState::Playing, PlaybackState::Paused)
    }

    /// Paused -> Playing.
    pub fn resume(&self) -> bool {
        self.transition(PlaybackState::Paused, PlaybackState::Playing)
    }

    /// Force back to Idle from anywhere.
    pub fn stop(&self) {
        self.state.store(PlaybackState::Idle as u8, Ordering::Release);
    }
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Idle as u8),
        }
    }
}
