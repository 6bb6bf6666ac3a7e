//! The seam between the pipelines and whatever drives the audio hardware.

use std::time::Duration;

use thiserror::Error;

use super::ring_buffer::RingError;
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio device unavailable: {0}")]
    Device(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("codec timed out after {0:?}")]
    Timeout(Duration),
    #[error("codec is suspended")]
    Suspended,
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    #[error("PCM frame of {0} bytes is not sample aligned")]
    Misaligned(usize),
    #[error(transparent)]
    Ring(#[from] RingError),
}

impl AudioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(_) | Self::Stream(_) => ErrorKind::Fatal,
            Self::Timeout(_) => ErrorKind::TransientIo,
            Self::Suspended | Self::AlreadyRunning(_) => ErrorKind::State,
            Self::Misaligned(_) => ErrorKind::InvalidArgument,
            Self::Ring(e) => e.kind(),
        }
    }
}

/// Fixed stream format negotiated when the codec opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Interleaved channels yielded by `read`.
    pub input_channels: u16,
    /// `write` always takes mono; the codec fans it out.
    pub output_channels: u16,
}

impl CodecFormat {
    /// Bytes in one capture frame (one sample per input channel).
    pub fn input_frame_bytes(&self) -> usize {
        self.input_channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// Blocking PCM codec. Shared by the capture and playback threads.
pub trait AudioCodec: Send + Sync {
    fn format(&self) -> CodecFormat;

    /// Fill all of `buf` with interleaved capture PCM, waiting up to
    /// `timeout`. Nothing is consumed when it times out.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AudioError>;

    /// Queue mono PCM for output, waiting up to `timeout` for room. Paces
    /// the caller at the output clock.
    fn write(&self, buf: &[u8], timeout: Duration) -> Result<usize, AudioError>;

    /// Output volume in percent; values above 100 are clamped.
    fn set_volume(&self, volume: u8) -> Result<(), AudioError>;
    fn volume(&self) -> u8;
    fn set_muted(&self, muted: bool) -> Result<(), AudioError>;
    fn set_mic_gain(&self, db: f32) -> Result<(), AudioError>;

    fn suspend(&self) -> Result<(), AudioError>;
    fn resume(&self) -> Result<(), AudioError>;
}
