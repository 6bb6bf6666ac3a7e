//! Inbound frame routing and command application.

use chrono::Timelike;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::demo::DemoStep;
use crate::audio::{AudioError, PlaybackFeeder};
use crate::face::{ClockSpec, FaceEngine, FaceError, ModeKind};
use crate::net::{parse_command, Command, InboundFrame};

/// Demultiplexes transport frames: binary PCM to the playback FIFO, text
/// through the codec onto the control loop's command queue. Runs on the
/// transport task, so it never waits.
pub struct FrameRouter {
    feeder: Option<PlaybackFeeder>,
    commands: mpsc::UnboundedSender<Command>,
    rejected: u64,
}

impl FrameRouter {
    pub fn new(feeder: Option<PlaybackFeeder>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            feeder,
            commands,
            rejected: 0,
        }
    }

    pub fn route(&mut self, frame: InboundFrame<'_>) {
        match frame {
            InboundFrame::Binary(pcm) => {
                let Some(feeder) = self.feeder.as_mut() else {
                    return;
                };
                match feeder.feed(pcm) {
                    Ok(()) => {}
                    Err(AudioError::Misaligned(len)) => {
                        debug!(len, "Dropped odd-length audio frame");
                    }
                    // Full: the feeder counts and rate-limits its own warning.
                    Err(_) => {}
                }
            }
            InboundFrame::Text(text) => match parse_command(text) {
                Ok(cmd) => {
                    debug!(cmd = cmd.name(), "Command received");
                    if self.commands.send(cmd).is_err() {
                        debug!("Command queue closed");
                    }
                }
                Err(e) => {
                    self.rejected += 1;
                    warn!(error = %e, rejected = self.rejected, "Rejected command");
                }
            },
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

/// What applying a command asks of the caller beyond the face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Face,
    /// Enable or disable the microphone uplink.
    Streaming(bool),
    Ignored,
}

/// Apply one command to the face engine.
pub fn apply(engine: &FaceEngine, cmd: Command) -> Result<Applied, FaceError> {
    match cmd {
        Command::Emotion(emotion) => {
            info!(%emotion, "Emotion");
            engine.set_emotion(emotion)?;
        }
        Command::Gaze { x, y } => engine.set_gaze(x, y)?,
        Command::Text(content) => engine.show_text(content)?,
        Command::TextClear => engine.clear_text()?,
        Command::PixelArt(art) => {
            debug!(pixels = art.pixels.len(), "Pixel art");
            engine.show_pixel_art(art)?;
        }
        Command::PixelArtClear => engine.clear_pixel_art()?,
        Command::Weather(weather) => engine.show_weather(weather)?,
        Command::Timer(timer) => engine.show_timer(timer)?,
        Command::Clock(clock) => engine.show_clock(clock)?,
        Command::Animation(kind) => engine.show_animation(kind)?,
        Command::ClearDisplay => engine.clear_display()?,
        Command::AudioStart => return Ok(Applied::Streaming(true)),
        Command::AudioStop => return Ok(Applied::Streaming(false)),
        Command::Unknown { name } => {
            warn!(cmd = %name, "Unknown command ignored");
            return Ok(Applied::Ignored);
        }
    }
    Ok(Applied::Face)
}

/// Show one demo step. Emotions need the face, so other screens are
/// cleared first.
pub fn apply_demo_step(engine: &FaceEngine, step: DemoStep) -> Result<(), FaceError> {
    debug!(?step, "Demo step");
    match step {
        DemoStep::Emotion(emotion) => {
            if engine.mode()? != ModeKind::Face {
                engine.clear_display()?;
            }
            engine.set_emotion(emotion)
        }
        DemoStep::Clock => {
            let now = chrono::Local::now();
            engine.show_clock(ClockSpec {
                hours: now.hour(),
                minutes: now.minute(),
                is_24h: true,
            })
        }
        DemoStep::Animation(kind) => engine.show_animation(kind),
    }
}
