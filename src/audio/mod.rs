//! Audio: codec seam, ring buffers, capture and playback pipelines.
//!
//! Everything on the wire and in the FIFOs is signed 16-bit little-endian
//! PCM at 16 kHz, moved in 20 ms chunks.

pub mod capture;
pub mod codec;
pub mod cpal_codec;
pub mod manager;
pub mod playback;
pub mod ring_buffer;
pub mod state;

#[cfg(test)]
pub(crate) mod test_codec;

use std::time::Duration;

pub use capture::{CaptureConfig, CapturePipeline, CaptureStats};
pub use codec::{AudioCodec, AudioError, CodecFormat};
pub use cpal_codec::CpalCodec;
pub use manager::{AudioConfig, AudioManager};
pub use playback::{PlaybackFeeder, PlaybackPipeline};
pub use ring_buffer::{byte_ring, ByteConsumer, ByteProducer, RingError};
pub use state::{PlaybackState, PlaybackStateMachine};

/// Pipeline sample rate.
pub const SAMPLE_RATE: u32 = 16_000;

/// Bits per sample on the wire and at the codec.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Samples per channel in one chunk (20 ms at 16 kHz).
pub const CHUNK_SAMPLES: usize = 320;

/// Bytes in one mono chunk.
pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;

pub const CHUNK_DURATION: Duration = Duration::from_millis(20);

/// Decode little-endian i16 PCM. A trailing odd byte is ignored.
pub fn pcm_to_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Encode samples as little-endian i16 PCM, appending to `out`.
pub fn samples_to_pcm(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}
