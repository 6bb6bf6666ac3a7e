//! Microphone capture pipeline.
//!
//! A dedicated thread blocks on the codec, reads one 20 ms chunk of
//! interleaved PCM at a time, and publishes it without ever blocking:
//!
//! - the raw interleaved chunk into a small stereo FIFO (optional, for a
//!   direction-of-arrival stage downstream),
//! - the mono downmix into the main FIFO that feeds the network uplink.
//!
//! Full FIFOs drop the chunk and bump a counter; a warning is logged every
//! 100 dropped chunks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::codec::{AudioCodec, AudioError};
use super::ring_buffer::{byte_ring, ByteConsumer, ByteProducer, DropCounter};
use super::{CHUNK_BYTES, CHUNK_DURATION, CHUNK_SAMPLES};

/// Log a warning once per this many dropped chunks.
const DROP_WARN_EVERY: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Average the two hardware channels into the mono FIFO.
    pub stereo_to_mono: bool,
    /// Mono FIFO size in bytes.
    pub mono_buffer_bytes: usize,
    /// Stereo FIFO size in chunks. Zero disables it.
    pub stereo_buffer_chunks: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stereo_to_mono: true,
            mono_buffer_bytes: 16 * 1024,
            stereo_buffer_chunks: 4,
        }
    }
}

/// Running counters, readable from any thread.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub chunks: AtomicU64,
    pub short_reads: AtomicU64,
    pub mono_dropped: DropCounter,
    pub stereo_dropped: DropCounter,
}

struct CaptureRings {
    mono: ByteProducer,
    stereo: Option<ByteProducer>,
}

pub struct CapturePipeline {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<CaptureRings>>,
    rings: Option<CaptureRings>,
    stats: Arc<CaptureStats>,
}

impl CapturePipeline {
    /// Allocate the FIFOs. Returns the pipeline plus the mono consumer and,
    /// when it could be allocated, the stereo consumer.
    pub fn new(
        config: CaptureConfig,
    ) -> Result<(Self, ByteConsumer, Option<ByteConsumer>), AudioError> {
        let (mono_tx, mono_rx) = byte_ring(config.mono_buffer_bytes)?;

        // Stereo is a nice-to-have; run without it rather than fail.
        let stereo_bytes = config.stereo_buffer_chunks * CHUNK_BYTES * 2;
        let (stereo_tx, stereo_rx) = if stereo_bytes == 0 {
            (None, None)
        } else {
            match byte_ring(stereo_bytes) {
                Ok((tx, rx)) => (Some(tx), Some(rx)),
                Err(e) => {
                    warn!(error = %e, "Stereo capture FIFO unavailable, continuing mono only");
                    (None, None)
                }
            }
        };

        let stats = Arc::new(CaptureStats {
            mono_dropped: mono_tx.drop_counter(),
            stereo_dropped: stereo_tx
                .as_ref()
                .map(ByteProducer::drop_counter)
                .unwrap_or_default(),
            ..CaptureStats::default()
        });

        let pipeline = Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            rings: Some(CaptureRings {
                mono: mono_tx,
                stereo: stereo_tx,
            }),
            stats,
        };
        Ok((pipeline, mono_rx, stereo_rx))
    }

    /// Spawn the capture thread.
    pub fn start(&mut self, codec: Arc<dyn AudioCodec>) -> Result<(), AudioError> {
        let Some(mut rings) = self.rings.take() else {
            return Err(AudioError::AlreadyRunning("capture"));
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let stereo_to_mono = self.config.stereo_to_mono;

        let handle = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let format = codec.format();
                let mut raw = vec![0u8; CHUNK_SAMPLES * format.input_frame_bytes()];
                let mut mono = Vec::with_capacity(CHUNK_BYTES);
                info!(
                    channels = format.input_channels,
                    stereo_to_mono, "Capture started"
                );

                while running.load(Ordering::Acquire) {
                    if let Err(e) = capture_chunk(
                        codec.as_ref(),
                        &mut raw,
                        &mut mono,
                        &mut rings,
                        &stats,
                        stereo_to_mono,
                    ) {
                        match e {
                            AudioError::Timeout(_) => {
                                stats.short_reads.fetch_add(1, Ordering::Relaxed);
                            }
                            other => {
                                error!(error = %other, "Capture read failed");
                                std::thread::sleep(CHUNK_DURATION);
                            }
                        }
                    }
                }

                info!(
                    chunks = stats.chunks.load(Ordering::Relaxed),
                    dropped = stats.mono_dropped.get(),
                    "Capture stopped"
                );
                rings
            });

        match handle {
            Ok(h) => {
                self.thread = Some(h);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(AudioError::Stream(format!("failed to spawn capture thread: {e}")))
            }
        }
    }

    /// Flip the running flag and join. The thread exits at its next codec
    /// read, which is bounded by two chunk periods.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(rings) => self.rings = Some(rings),
                Err(_) => error!("Capture thread panicked"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Warn on every `DROP_WARN_EVERY`th drop from either FIFO. Returns whether
/// this drop was logged.
fn report_drop(fifo: &'static str, dropped: u64) -> bool {
    if dropped == 0 || dropped % DROP_WARN_EVERY != 0 {
        return false;
    }
    warn!(fifo, dropped, "Capture FIFO full, dropping chunks");
    true
}

/// One iteration: read a chunk, fan it out to the FIFOs.
fn capture_chunk(
    codec: &dyn AudioCodec,
    raw: &mut [u8],
    mono: &mut Vec<u8>,
    rings: &mut CaptureRings,
    stats: &CaptureStats,
    stereo_to_mono: bool,
) -> Result<(), AudioError> {
    codec.read(raw, CHUNK_DURATION * 2)?;
    stats.chunks.fetch_add(1, Ordering::Relaxed);

    let channels = codec.format().input_channels;

    if channels == 2 {
        if let Some(stereo) = rings.stereo.as_mut() {
            if stereo.try_send(raw).is_err() {
                report_drop("stereo", stats.stereo_dropped.get());
            }
        }
    }

    let payload: &[u8] = if channels == 2 && stereo_to_mono {
        downmix_stereo(raw, mono);
        mono
    } else if channels > 1 {
        take_first_channel(raw, channels as usize, mono);
        mono
    } else {
        raw
    };

    if rings.mono.try_send(payload).is_err() {
        report_drop("mono", stats.mono_dropped.get());
    }
    Ok(())
}

/// Average interleaved L/R i16 frames into mono.
pub fn downmix_stereo(interleaved: &[u8], out: &mut Vec<u8>) {
    out.clear();
    for frame in interleaved.chunks_exact(4) {
        let l = i16::from_le_bytes([frame[0], frame[1]]) as i32;
        let r = i16::from_le_bytes([frame[2], frame[3]]) as i32;
        out.extend_from_slice(&(((l + r) / 2) as i16).to_le_bytes());
    }
}

fn take_first_channel(interleaved: &[u8], channels: usize, out: &mut Vec<u8>) {
    out.clear();
    for frame in interleaved.chunks_exact(channels * 2) {
        out.extend_from_slice(&frame[..2]);
    }
}

/// Pull stereo frames from the stereo FIFO and split them into channels.
/// Returns the number of frames written to each slice.
pub fn read_stereo(
    consumer: &mut ByteConsumer,
    left: &mut [i16],
    right: &mut [i16],
    timeout: Duration,
) -> usize {
    let frames = left.len().min(right.len());
    if frames == 0 || !consumer.wait_available(4, timeout) {
        return 0;
    }
    let whole = (consumer.available() / 4).min(frames);
    let mut buf = vec![0u8; whole * 4];
    let n = consumer.read(&mut buf, Duration::ZERO) / 4;
    for (i, frame) in buf.chunks_exact(4).take(n).enumerate() {
        left[i] = i16::from_le_bytes([frame[0], frame[1]]);
        right[i] = i16::from_le_bytes([frame[2], frame[3]]);
    }
    n
}
